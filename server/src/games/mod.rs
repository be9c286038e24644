//! Read access to the games being analyzed.
//!
//! Games are owned by whatever imported them. The pipeline only reads them
//! through [`GameRepository`], which returns `impl Future + Send` so the
//! futures can be driven from spawned worker tasks.

mod json_store;

pub use json_store::JsonGameStore;

use std::future::Future;

use analysis::Side;
use serde::{Deserialize, Serialize};

/// Errors from the game repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid game id: {0:?}")]
    InvalidId(String),
}

/// Descriptive data about a game, used for batch filters and feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    #[serde(default)]
    pub white: Option<String>,
    #[serde(default)]
    pub black: Option<String>,
    #[serde(default)]
    pub time_control: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    /// The player the feedback addresses. White when absent.
    #[serde(default)]
    pub subject: Option<Side>,
}

/// A recorded game as handed over by the import side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    /// Starting position; the standard start when absent.
    #[serde(default)]
    pub start_fen: Option<String>,
    /// Moves in UCI (`e2e4`) or SAN (`Nf3`).
    pub moves: Vec<String>,
    /// Wall-clock time spent on each move, parallel to `moves`.
    #[serde(default)]
    pub time_spent_ms: Option<Vec<u64>>,
    #[serde(default)]
    pub metadata: GameMetadata,
}

impl GameRecord {
    pub fn subject(&self) -> Side {
        self.metadata.subject.unwrap_or_default()
    }

    /// Time spent on the move at `index`, if it was recorded.
    pub fn time_spent(&self, index: usize) -> Option<u64> {
        self.time_spent_ms.as_ref()?.get(index).copied()
    }
}

/// Optional batch filters over [`GameMetadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameFilters {
    #[serde(default)]
    pub time_control: Option<String>,
    /// Matches either player's name, case-insensitively.
    #[serde(default)]
    pub player: Option<String>,
}

impl GameFilters {
    pub fn is_empty(&self) -> bool {
        self.time_control.is_none() && self.player.is_none()
    }

    pub fn matches(&self, metadata: &GameMetadata) -> bool {
        let same = |wanted: &str, actual: &Option<String>| {
            actual
                .as_deref()
                .is_some_and(|actual| actual.trim().eq_ignore_ascii_case(wanted.trim()))
        };
        let time_ok = self
            .time_control
            .as_deref()
            .map_or(true, |tc| same(tc, &metadata.time_control));
        let player_ok = self
            .player
            .as_deref()
            .map_or(true, |p| same(p, &metadata.white) || same(p, &metadata.black));
        time_ok && player_ok
    }
}

/// Read-only access to stored games.
pub trait GameRepository: Send + Sync + 'static {
    fn get_game(
        &self,
        game_id: &str,
    ) -> impl Future<Output = Result<Option<GameRecord>, RepositoryError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> GameMetadata {
        GameMetadata {
            white: Some("Alice".to_string()),
            black: Some("Bob".to_string()),
            time_control: Some("600+5".to_string()),
            result: Some("1-0".to_string()),
            subject: None,
        }
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = GameFilters::default();
        assert!(filters.is_empty());
        assert!(filters.matches(&GameMetadata::default()));
    }

    #[test]
    fn test_player_filter_checks_both_sides() {
        let filters = GameFilters {
            player: Some("bob".to_string()),
            ..GameFilters::default()
        };
        assert!(filters.matches(&metadata()));
        let filters = GameFilters {
            player: Some("carol".to_string()),
            ..GameFilters::default()
        };
        assert!(!filters.matches(&metadata()));
    }

    #[test]
    fn test_time_control_filter_requires_metadata() {
        let filters = GameFilters {
            time_control: Some("600+5".to_string()),
            player: Some("ALICE".to_string()),
        };
        assert!(filters.matches(&metadata()));
        assert!(!filters.matches(&GameMetadata::default()));
    }

    #[test]
    fn test_record_defaults() {
        let record: GameRecord =
            serde_json::from_str(r#"{"game_id":"g1","moves":["e4","e5"]}"#).unwrap();
        assert_eq!(record.subject(), Side::White);
        assert_eq!(record.time_spent(0), None);
        assert!(record.start_fen.is_none());
    }
}
