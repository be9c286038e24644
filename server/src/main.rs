use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chessinsight_server::config::ServerConfig;
use chessinsight_server::feedback::{FeedbackSynthesizer, OpenAiFeedbackService};
use chessinsight_server::games::JsonGameStore;
use chessinsight_server::pipeline::AnalysisManager;
use clap::Parser;
use engine::{EnginePool, StockfishFactory};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Chess game analysis service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory holding games/<game_id>.json.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Number of engine processes.
    #[arg(long)]
    pool_size: Option<usize>,
    /// Number of analysis workers.
    #[arg(long)]
    workers: Option<usize>,
    /// Search depth per position.
    #[arg(long)]
    depth: Option<u8>,
    /// Search time per position in milliseconds; overrides --depth.
    #[arg(long)]
    movetime_ms: Option<u64>,
    /// Path to the Stockfish binary.
    #[arg(long, env = "STOCKFISH_PATH")]
    stockfish: Option<PathBuf>,
    /// Also write a daily rolling log file into this directory.
    #[arg(long, env = "CHESSINSIGHT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size.max(1);
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers.max(1);
        }
        if let Some(depth) = self.depth {
            config.analysis_depth = depth.max(1);
        }
        if self.movetime_ms.is_some() {
            config.movetime_ms = self.movetime_ms;
        }
        if self.stockfish.is_some() {
            config.stockfish_path = self.stockfish.clone();
        }
    }
}

/// Initialize tracing with span durations, plus an optional daily log file.
///
/// The returned guard must live until exit so buffered file output is flushed.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chessinsight.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_ref());

    let mut config = ServerConfig::from_env();
    cli.apply(&mut config);

    tracing::info!("Starting chessinsight server");
    tracing::info!("Using data directory: {}", config.data_dir.display());

    let factory = StockfishFactory::locate(config.stockfish_path.clone(), config.engine())
        .context("Stockfish binary not found; set STOCKFISH_PATH")?;

    let pool = EnginePool::new(factory, config.pool_size);
    if let Err(e) = pool.warm_up().await {
        tracing::warn!("Engine warm-up failed, engines will start on demand: {}", e);
    }

    let games = Arc::new(JsonGameStore::new(config.games_dir()));

    let ai = OpenAiFeedbackService::new(&config.feedback);
    match &ai {
        Some(service) => tracing::info!(model = %service.model(), "AI feedback enabled"),
        None => tracing::info!("AI feedback disabled, using statistical feedback"),
    }
    let feedback = FeedbackSynthesizer::new(ai, config.retry.clone(), config.feedback.timeout);

    let shutdown = CancellationToken::new();
    let manager = Arc::new(AnalysisManager::new(
        pool,
        games,
        feedback,
        config.pipeline(),
        shutdown.clone(),
    ));

    tokio::spawn({
        let store = Arc::clone(manager.store());
        let retention = config.task_retention;
        let shutdown = shutdown.clone();
        async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        store.prune_finished(retention).await;
                    }
                }
            }
        }
    });

    let app = chessinsight_server::api::router(Arc::clone(&manager));
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
                    _ = shutdown.cancelled() => {}
                }
                shutdown.cancel();
            }
        })
        .await
        .context("HTTP server error")?;

    manager.shutdown().await;
    Ok(())
}
