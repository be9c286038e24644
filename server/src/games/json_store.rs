use std::path::PathBuf;

use super::{GameRecord, GameRepository, RepositoryError};

/// JSON-file-per-game repository: `<dir>/<game_id>.json`.
pub struct JsonGameStore {
    dir: PathBuf,
}

impl JsonGameStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_path(&self, id: &str) -> Result<PathBuf, RepositoryError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(RepositoryError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Write a game, replacing any previous record with the same id.
    pub async fn save(&self, game: &GameRecord) -> Result<(), RepositoryError> {
        let path = self.file_path(&game.game_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(game)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    /// Load a game by id. Returns None if not found.
    pub async fn load(&self, id: &str) -> Result<Option<GameRecord>, RepositoryError> {
        let path = match self.file_path(id) {
            Ok(path) => path,
            Err(RepositoryError::InvalidId(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

impl GameRepository for JsonGameStore {
    async fn get_game(&self, game_id: &str) -> Result<Option<GameRecord>, RepositoryError> {
        self.load(game_id).await
    }
}
