use crate::uci::{parse_uci_message, UciMessage};
use crate::{EngineError, EngineFactory, Evaluator, PositionEvaluation, SearchLimit};
use chess::AnalysisScore;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};

/// Time allowed for `stop` to produce a `bestmove` after a search overran.
const STOP_GRACE: Duration = Duration::from_millis(500);
/// Time allowed for an idle engine to answer `isready`.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for engine processes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub threads: Option<u32>,
    pub hash_mb: Option<u32>,
    /// Deadline for the `uci` / `isready` handshake.
    pub startup_timeout: Duration,
    /// Hard deadline for a single `go`.
    pub eval_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: Some(1),
            hash_mb: Some(64),
            startup_timeout: Duration::from_secs(10),
            eval_timeout: Duration::from_secs(30),
        }
    }
}

/// A single Stockfish process speaking UCI over stdin/stdout.
pub struct StockfishEngine {
    process: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    config: EngineConfig,
    healthy: bool,
}

impl StockfishEngine {
    /// Spawn and initialize a new engine process.
    #[tracing::instrument(level = "info", skip(config))]
    pub async fn spawn(path: &Path, config: EngineConfig) -> Result<Self, EngineError> {
        let mut process = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn Stockfish: {}", e);
                EngineError::Spawn(format!("{}: {}", path.display(), e))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("engine has no stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("engine has no stdout".to_string()))?;

        let mut engine = Self {
            process,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            config,
            healthy: true,
        };

        let startup_timeout = engine.config.startup_timeout;
        tokio::time::timeout(startup_timeout, engine.handshake())
            .await
            .map_err(|_| {
                tracing::error!("Timeout waiting for engine handshake");
                EngineError::Spawn(format!("no handshake within {:?}", startup_timeout))
            })??;

        tracing::info!("Stockfish engine spawned and initialized");
        Ok(engine)
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for(&UciMessage::UciOk).await?;

        if let Some(threads) = self.config.threads {
            let threads = threads.clamp(1, 16);
            self.send(&format!("setoption name Threads value {}", threads))
                .await?;
        }
        if let Some(hash_mb) = self.config.hash_mb {
            let hash_mb = hash_mb.clamp(1, 2048);
            self.send(&format!("setoption name Hash value {}", hash_mb))
                .await?;
        }

        self.send("isready").await?;
        self.wait_for(&UciMessage::ReadyOk).await
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        tracing::trace!("UCI >> {}", cmd);
        let io = async {
            self.stdin.write_all(cmd.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        };
        io.await.map_err(|e| {
            self.healthy = false;
            EngineError::Crashed(format!("write failed: {}", e))
        })
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        match self.stdout.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!("UCI << {}", line.trim());
                Ok(line)
            }
            Ok(None) => {
                tracing::warn!("Stockfish stdout EOF - engine closed");
                self.healthy = false;
                Err(EngineError::Crashed("unexpected end of output".to_string()))
            }
            Err(e) => {
                self.healthy = false;
                Err(EngineError::Crashed(format!("read failed: {}", e)))
            }
        }
    }

    async fn wait_for(&mut self, expected: &UciMessage) -> Result<(), EngineError> {
        loop {
            let line = self.next_line().await?;
            if parse_uci_message(line.trim()).ok().as_ref() == Some(expected) {
                return Ok(());
            }
        }
    }

    /// Read `info` lines until `bestmove`, keeping the deepest exact score.
    async fn read_search(&mut self) -> Result<PositionEvaluation, EngineError> {
        let mut score: Option<AnalysisScore> = None;
        let mut depth = 0u8;
        let mut pv = Vec::new();

        loop {
            let line = self.next_line().await?;
            match parse_uci_message(line.trim()) {
                Ok(UciMessage::Info(info)) => {
                    if info.bounded || info.multipv.is_some_and(|n| n > 1) {
                        continue;
                    }
                    if let Some(s) = info.score {
                        score = Some(s);
                        depth = info.depth.unwrap_or(depth);
                        if !info.pv.is_empty() {
                            pv = info.pv;
                        }
                    }
                }
                Ok(UciMessage::BestMove { mv, .. }) => {
                    let score = score.ok_or_else(|| {
                        EngineError::MalformedOutput(format!("bestmove without score: {}", line))
                    })?;
                    return Ok(PositionEvaluation {
                        score,
                        best_move: mv,
                        principal_variation: pv,
                        depth,
                    });
                }
                Ok(_) => {}
                Err(e) if line.trim_start().starts_with("bestmove") => {
                    self.healthy = false;
                    return Err(e.into());
                }
                Err(e) => tracing::trace!("Ignoring engine line: {}", e),
            }
        }
    }

    /// Discard output up to the `bestmove` that answers `stop`.
    ///
    /// A stopped search may end before any scored `info` line, so a bare
    /// `bestmove` is enough here.
    async fn drain_to_bestmove(&mut self) -> Result<(), EngineError> {
        loop {
            let line = self.next_line().await?;
            if line.trim_start().starts_with("bestmove") {
                return Ok(());
            }
        }
    }
}

impl Evaluator for StockfishEngine {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
    ) -> Result<PositionEvaluation, EngineError> {
        if !self.healthy {
            return Err(EngineError::Crashed("engine marked unhealthy".to_string()));
        }

        self.send(&format!("position fen {}", fen)).await?;
        self.send(&limit.go_command()).await?;

        let eval_timeout = self.config.eval_timeout;
        match tokio::time::timeout(eval_timeout, self.read_search()).await {
            Ok(result) => {
                if matches!(result, Err(EngineError::MalformedOutput(_))) {
                    self.healthy = false;
                }
                result
            }
            Err(_) => {
                tracing::warn!("Search overran {:?}, sending stop", eval_timeout);
                let drained = match self.send("stop").await {
                    Ok(()) => tokio::time::timeout(STOP_GRACE, self.drain_to_bestmove())
                        .await
                        .is_ok_and(|r| r.is_ok()),
                    Err(_) => false,
                };
                if !drained {
                    self.healthy = false;
                }
                Err(EngineError::EvaluationTimeout(eval_timeout))
            }
        }
    }

    async fn is_healthy(&mut self) -> bool {
        if !self.healthy {
            return false;
        }
        if !matches!(self.process.try_wait(), Ok(None)) {
            self.healthy = false;
            return false;
        }
        let ping = async {
            self.send("isready").await?;
            self.wait_for(&UciMessage::ReadyOk).await
        };
        let alive = matches!(tokio::time::timeout(PING_TIMEOUT, ping).await, Ok(Ok(())));
        if !alive {
            self.healthy = false;
        }
        alive
    }

    async fn shutdown(mut self) {
        let _ = self.send("quit").await;
        let _ = tokio::time::timeout(Duration::from_secs(1), self.process.wait()).await;
        let _ = self.process.kill().await;
    }
}

/// Spawns Stockfish processes for the engine pool.
#[derive(Debug, Clone)]
pub struct StockfishFactory {
    path: PathBuf,
    config: EngineConfig,
}

impl StockfishFactory {
    pub fn new(path: PathBuf, config: EngineConfig) -> Self {
        Self { path, config }
    }

    /// Use `explicit` when given, otherwise search common install locations.
    pub fn locate(explicit: Option<PathBuf>, config: EngineConfig) -> Result<Self, EngineError> {
        let path = match explicit {
            Some(path) => path,
            None => find_stockfish_path()
                .ok_or_else(|| EngineError::Spawn("Stockfish not found".to_string()))?,
        };
        tracing::info!("Using Stockfish at: {:?}", path);
        Ok(Self::new(path, config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EngineFactory for StockfishFactory {
    type Engine = StockfishEngine;

    async fn create(&self) -> Result<StockfishEngine, EngineError> {
        StockfishEngine::spawn(&self.path, self.config.clone()).await
    }
}

/// Find Stockfish executable in common locations
fn find_stockfish_path() -> Option<PathBuf> {
    let paths = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
        "stockfish", // In PATH
    ];

    paths
        .iter()
        .find(|path_str| {
            (Path::new(path_str).exists() || **path_str == "stockfish")
                && std::process::Command::new(path_str)
                    .arg("quit")
                    .stdout(Stdio::null())
                    .output()
                    .is_ok()
        })
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let result = StockfishEngine::spawn(
            Path::new("/nonexistent/stockfish-binary"),
            EngineConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Spawn(_))));
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let factory = StockfishFactory::locate(
            Some(PathBuf::from("/opt/engines/sf")),
            EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(factory.path(), Path::new("/opt/engines/sf"));
    }

    /// Write a shell script that speaks just enough UCI. Deep searches never
    /// finish on their own; `stop` is answered with `stop_reply`.
    #[cfg(unix)]
    fn fake_engine(dir: &Path, stop_reply: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci) echo "id name fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    "go depth 1") echo "info depth 1 score cp 20 pv e2e4"; echo "bestmove e2e4" ;;
    stop) {} ;;
    quit) exit 0 ;;
  esac
done
"#,
            stop_reply
        );
        let path = dir.join("fake-engine");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn quick_timeout() -> EngineConfig {
        EngineConfig {
            threads: None,
            hash_mb: None,
            startup_timeout: Duration::from_secs(5),
            eval_timeout: Duration::from_millis(100),
        }
    }

    #[cfg(unix)]
    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stopped_search_with_bare_bestmove_keeps_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_engine(dir.path(), r#"echo "bestmove e2e4""#);
        let mut engine = StockfishEngine::spawn(&path, quick_timeout()).await.unwrap();

        let result = engine.evaluate(START, SearchLimit::Depth(20)).await;
        assert!(matches!(result, Err(EngineError::EvaluationTimeout(_))));
        assert!(engine.is_healthy().await);

        let eval = engine.evaluate(START, SearchLimit::Depth(1)).await.unwrap();
        assert_eq!(eval.score, AnalysisScore::Centipawns(20));
        assert_eq!(eval.best_move.as_deref(), Some("e2e4"));
        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_ignoring_stop_is_retired() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_engine(dir.path(), ":");
        let mut engine = StockfishEngine::spawn(&path, quick_timeout()).await.unwrap();

        let result = engine.evaluate(START, SearchLimit::Depth(20)).await;
        assert!(matches!(result, Err(EngineError::EvaluationTimeout(_))));
        assert!(!engine.is_healthy().await);
        engine.shutdown().await;
    }
}
