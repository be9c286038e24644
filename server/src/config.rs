//! Configuration for the chessinsight server
//!
//! Values start from built-in defaults and are overridden by `CHESSINSIGHT_*`
//! environment variables. The binary applies its command-line flags on top.
//! The data directory follows this precedence:
//! 1. CHESSINSIGHT_DATA_DIR environment variable
//! 2. ~/.config/chessinsight/data (production default)
//! 3. ./data (fallback for development)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use analysis::MetricsConfig;
use engine::{EngineConfig, SearchLimit};

use crate::feedback::FeedbackConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryPolicy;

const ENV_PREFIX: &str = "CHESSINSIGHT_";
const DEFAULT_CONFIG_DIR: &str = ".config/chessinsight/data";
const DEV_DATA_DIR: &str = "./data";

const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_ANALYSIS_DEPTH: u8 = 16;
const DEFAULT_DEPTH_STEP: u8 = 4;
const DEFAULT_CHECKOUT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_EVAL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BATCH_SIZE: usize = 50;
const DEFAULT_ESTIMATED_MS_PER_POSITION: u64 = 250;
const DEFAULT_TASK_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FEEDBACK_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_FEEDBACK_MODEL: &str = "gpt-4o-mini";
const DEFAULT_FEEDBACK_TIMEOUT_SECS: u64 = 20;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub pool_size: usize,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub analysis_depth: u8,
    /// Search by time instead of depth when set.
    pub movetime_ms: Option<u64>,
    pub depth_step: u8,
    pub checkout_timeout: Duration,
    pub eval_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_batch_size: usize,
    pub estimated_ms_per_position: u64,
    /// Succeeded tasks younger than this are returned instead of re-analyzing.
    pub reuse_completed_for: Duration,
    pub task_retention: Duration,
    pub stockfish_path: Option<PathBuf>,
    pub feedback: FeedbackConfig,
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEV_DATA_DIR),
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            pool_size: DEFAULT_POOL_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            analysis_depth: DEFAULT_ANALYSIS_DEPTH,
            movetime_ms: None,
            depth_step: DEFAULT_DEPTH_STEP,
            checkout_timeout: Duration::from_millis(DEFAULT_CHECKOUT_TIMEOUT_MS),
            eval_timeout: Duration::from_millis(DEFAULT_EVAL_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            estimated_ms_per_position: DEFAULT_ESTIMATED_MS_PER_POSITION,
            reuse_completed_for: Duration::ZERO,
            task_retention: Duration::from_secs(DEFAULT_TASK_RETENTION_SECS),
            stockfish_path: None,
            feedback: FeedbackConfig {
                api_url: DEFAULT_FEEDBACK_API_URL.to_string(),
                api_key: None,
                model: DEFAULT_FEEDBACK_MODEL.to_string(),
                timeout: Duration::from_secs(DEFAULT_FEEDBACK_TIMEOUT_SECS),
            },
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            data_dir: default_data_dir(&lookup),
            ..Self::default()
        };
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(bind) = parse_var(&var, "BIND") {
            config.bind = bind;
        }
        if let Some(size) = parse_var::<usize>(&var, "POOL_SIZE") {
            config.pool_size = size.max(1);
        }
        if let Some(count) = parse_var::<usize>(&var, "WORKER_COUNT") {
            config.worker_count = count.max(1);
        }
        if let Some(capacity) = parse_var::<usize>(&var, "QUEUE_CAPACITY") {
            config.queue_capacity = capacity.max(1);
        }
        if let Some(depth) = parse_var::<u8>(&var, "ANALYSIS_DEPTH") {
            config.analysis_depth = depth.max(1);
        }
        if let Some(ms) = parse_var(&var, "MOVETIME_MS") {
            config.movetime_ms = Some(ms);
        }
        if let Some(ms) = parse_var(&var, "CHECKOUT_TIMEOUT_MS") {
            config.checkout_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&var, "EVAL_TIMEOUT_MS") {
            config.eval_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>(&var, "RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var(&var, "RETRY_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&var, "MAX_BATCH_SIZE") {
            config.max_batch_size = size.max(1);
        }
        if let Some(secs) = parse_var(&var, "REUSE_COMPLETED_SECS") {
            config.reuse_completed_for = Duration::from_secs(secs);
        }

        config.stockfish_path = lookup("STOCKFISH_PATH").map(PathBuf::from);
        if let Some(url) = lookup("FEEDBACK_API_URL") {
            config.feedback.api_url = url;
        }
        config.feedback.api_key = lookup("FEEDBACK_API_KEY").filter(|key| !key.is_empty());
        if let Some(model) = lookup("FEEDBACK_MODEL") {
            config.feedback.model = model;
        }

        config
    }

    /// Search limit used for every position.
    pub fn search_limit(&self) -> SearchLimit {
        match self.movetime_ms {
            Some(ms) => SearchLimit::MoveTime(ms),
            None => SearchLimit::Depth(self.analysis_depth),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            eval_timeout: self.eval_timeout,
            ..EngineConfig::default()
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            search_limit: self.search_limit(),
            depth_step: self.depth_step,
            checkout_timeout: self.checkout_timeout,
            retry: self.retry.clone(),
            max_batch_size: self.max_batch_size,
            estimated_ms_per_position: self.estimated_ms_per_position,
            reuse_completed_for: self.reuse_completed_for,
            metrics: self.metrics.clone(),
        }
    }

    /// Directory holding one JSON file per game.
    pub fn games_dir(&self) -> PathBuf {
        self.data_dir.join("games")
    }
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = lookup("CHESSINSIGHT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = lookup("HOME") {
        return PathBuf::from(home).join(DEFAULT_CONFIG_DIR);
    }
    PathBuf::from(DEV_DATA_DIR)
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = %format!("{}{}", ENV_PREFIX, name), value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
