use chess::AnalysisScore;
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::White => "White",
            Self::Black => "Black",
        }
    }
}

/// Classification of a move's quality relative to the engine's best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveClassification {
    /// Below the inaccuracy threshold; carries no error tag.
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl MoveClassification {
    /// Classify a non-negative centipawn loss. A loss exactly on a threshold
    /// falls into the more severe class.
    pub fn from_cp_loss(cp_loss: i32, config: &MetricsConfig) -> Self {
        if cp_loss >= config.blunder_threshold {
            Self::Blunder
        } else if cp_loss >= config.mistake_threshold {
            Self::Mistake
        } else if cp_loss >= config.inaccuracy_threshold {
            Self::Inaccuracy
        } else {
            Self::Good
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, Self::Good)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub const ALL: [GamePhase; 3] = [Self::Opening, Self::Middlegame, Self::Endgame];

    pub fn name(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Middlegame => "middlegame",
            Self::Endgame => "endgame",
        }
    }
}

/// Engine verdict on one played move. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEvaluation {
    pub ply: u32,
    pub side: Side,
    pub san: String,
    pub uci: String,
    /// White-relative evaluation before the move.
    pub eval_before: AnalysisScore,
    /// White-relative evaluation after the move.
    pub eval_after: AnalysisScore,
    pub best_move: Option<String>,
    pub principal_variation: Vec<String>,
    /// Mover-relative loss against the engine's best line, capped.
    pub cp_loss: i32,
    pub classification: MoveClassification,
    pub depth: u8,
    pub time_spent_ms: Option<u64>,
    pub is_critical: bool,
    pub is_check: bool,
    pub is_best_move: bool,
    pub non_pawn_material: u32,
    pub undeveloped_minors_white: u8,
    pub undeveloped_minors_black: u8,
}

/// Per-phase, per-side statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: GamePhase,
    pub accuracy: f64,
    pub moves: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    pub tactical_opportunities: u32,
    pub best_moves: u32,
    pub average_cp_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticalMetrics {
    pub opportunities: u32,
    pub successes: u32,
    /// `None` when no opportunity arose.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeManagement {
    pub timed_moves: u32,
    pub average_ms: f64,
    /// Share of timed moves played under the low-time threshold (0.0-1.0).
    pub low_time_fraction: f64,
    /// `100 / (1 + coefficient of variation)`.
    pub consistency: f64,
}

/// Everything measured for one side of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideMetrics {
    pub side: Side,
    pub accuracy: f64,
    pub moves: u32,
    pub average_cp_loss: f64,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    pub best_moves: u32,
    pub phases: Vec<PhaseMetrics>,
    pub tactics: TacticalMetrics,
    pub time_management: Option<TimeManagement>,
}

impl SideMetrics {
    pub fn phase(&self, phase: GamePhase) -> Option<&PhaseMetrics> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// A swing or blunder worth showing to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalMoment {
    pub ply: u32,
    pub side: Side,
    pub san: String,
    pub best_move: Option<String>,
    pub eval_before: AnalysisScore,
    pub eval_after: AnalysisScore,
    /// White-relative change in centipawns.
    pub eval_swing: i32,
    pub classification: MoveClassification,
}

/// Headline numbers for the side the feedback addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub subject: Side,
    pub accuracy: f64,
    pub average_cp_loss: f64,
    pub moves: u32,
    pub blunders: u32,
    pub mistakes: u32,
    pub inaccuracies: u32,
    pub strongest_phase: Option<GamePhase>,
    pub weakest_phase: Option<GamePhase>,
}

/// Metrics for one analyzed game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMetrics {
    pub game_id: String,
    pub total_plies: u32,
    pub subject: Side,
    pub white: SideMetrics,
    pub black: SideMetrics,
    pub critical_moments: Vec<CriticalMoment>,
    pub summary: GameSummary,
}

impl GameMetrics {
    pub fn side(&self, side: Side) -> &SideMetrics {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn subject_metrics(&self) -> &SideMetrics {
        self.side(self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(cp_loss: i32) -> MoveClassification {
        MoveClassification::from_cp_loss(cp_loss, &MetricsConfig::default())
    }

    #[test]
    fn test_classification_examples() {
        assert_eq!(classify(305), MoveClassification::Blunder);
        assert_eq!(classify(150), MoveClassification::Mistake);
        assert_eq!(classify(75), MoveClassification::Inaccuracy);
        assert_eq!(classify(10), MoveClassification::Good);
    }

    #[test]
    fn test_classification_boundaries_go_to_severe_class() {
        assert_eq!(classify(300), MoveClassification::Blunder);
        assert_eq!(classify(299), MoveClassification::Mistake);
        assert_eq!(classify(100), MoveClassification::Mistake);
        assert_eq!(classify(99), MoveClassification::Inaccuracy);
        assert_eq!(classify(50), MoveClassification::Inaccuracy);
        assert_eq!(classify(49), MoveClassification::Good);
        assert_eq!(classify(0), MoveClassification::Good);
    }

    #[test]
    fn test_custom_thresholds() {
        let config = MetricsConfig {
            blunder_threshold: 200,
            ..MetricsConfig::default()
        };
        assert_eq!(
            MoveClassification::from_cp_loss(250, &config),
            MoveClassification::Blunder
        );
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&MoveClassification::Blunder).unwrap(),
            r#""blunder""#
        );
        assert_eq!(serde_json::to_string(&Side::Black).unwrap(), r#""black""#);
        assert_eq!(
            serde_json::to_string(&GamePhase::Middlegame).unwrap(),
            r#""middlegame""#
        );
    }
}
