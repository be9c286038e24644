use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff with jitter, shared by the engine caller and the
/// feedback caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let capped = (base * self.multiplier.powi(exponent)).min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// Sleep for the backoff of `retry`. Returns `false` if `cancel` fired first.
    pub async fn wait(&self, retry: u32, cancel: &CancellationToken) -> bool {
        let delay = self.backoff(retry);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
