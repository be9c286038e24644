//! Feedback synthesis with graceful degradation.
//!
//! The AI service is tried first (bounded by a timeout and the shared retry
//! policy). Any failure falls back to a deterministic narrative built from the
//! metrics, and missing metrics fall back to a generic message. Synthesis
//! itself never fails.

mod openai;

pub use openai::OpenAiFeedbackService;

use std::future::Future;
use std::time::Duration;

use analysis::{statistical_narrative, FeedbackPayload, GameMetrics, Narrative};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;

const FALLBACK_MESSAGE: &str =
    "Feedback is not available for this game. The move-by-move analysis is still complete.";

/// Settings for the AI feedback service.
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub api_url: String,
    /// The AI tier is disabled without a key.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Feedback request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Feedback service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid feedback response: {0}")]
    InvalidResponse(String),
}

impl FeedbackError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// External service turning metrics into a narrative.
pub trait FeedbackService: Send + Sync + 'static {
    fn generate_feedback(
        &self,
        metrics: &GameMetrics,
    ) -> impl Future<Output = Result<Narrative, FeedbackError>> + Send;
}

/// Produces a [`FeedbackPayload`] for every finished analysis.
pub struct FeedbackSynthesizer<S: FeedbackService> {
    service: Option<S>,
    retry: RetryPolicy,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl<S: FeedbackService> FeedbackSynthesizer<S> {
    pub fn new(service: Option<S>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            service,
            retry,
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop waiting between retries once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn ai_enabled(&self) -> bool {
        self.service.is_some()
    }

    pub async fn synthesize(&self, metrics: Option<&GameMetrics>) -> FeedbackPayload {
        let Some(metrics) = metrics.filter(|m| m.subject_metrics().moves > 0) else {
            return FeedbackPayload::ErrorFallback {
                message: FALLBACK_MESSAGE.to_string(),
            };
        };

        if let Some(service) = &self.service {
            match self.request_ai(service, metrics).await {
                Ok(narrative) => return FeedbackPayload::AiAnalysis(narrative),
                Err(e) => {
                    tracing::warn!(game_id = %metrics.game_id, "AI feedback unavailable, using statistics: {}", e);
                }
            }
        }

        match statistical_narrative(metrics) {
            Some(narrative) => FeedbackPayload::StatisticalAnalysis(narrative),
            None => FeedbackPayload::ErrorFallback {
                message: FALLBACK_MESSAGE.to_string(),
            },
        }
    }

    async fn request_ai(&self, service: &S, metrics: &GameMetrics) -> Result<Narrative, FeedbackError> {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, service.generate_feedback(metrics)).await {
                Ok(result) => result,
                Err(_) => Err(FeedbackError::Timeout(self.timeout)),
            };
            match result {
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    tracing::debug!(attempt, "Retrying feedback request: {}", e);
                    if !self.retry.wait(attempt, &self.shutdown).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails a fixed number of times, then answers.
    struct FlakyService {
        failures: u32,
        calls: Arc<AtomicU32>,
        delay: Duration,
        error: fn() -> FeedbackError,
    }

    impl FeedbackService for FlakyService {
        async fn generate_feedback(&self, _metrics: &GameMetrics) -> Result<Narrative, FeedbackError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err((self.error)());
            }
            Ok(Narrative {
                summary: "from the model".to_string(),
                ..Narrative::default()
            })
        }
    }

    fn flaky(failures: u32, error: fn() -> FeedbackError) -> (FlakyService, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            FlakyService {
                failures,
                calls: Arc::clone(&calls),
                delay: Duration::ZERO,
                error,
            },
            calls,
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    fn metrics() -> GameMetrics {
        let TaskResult { metrics, .. } = crate::tasks::tests::sample_result("g1");
        metrics
    }

    fn server_error() -> FeedbackError {
        FeedbackError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ai_success_after_transient_failures() {
        let (service, calls) = flaky(2, server_error);
        let synth = FeedbackSynthesizer::new(Some(service), fast_retry(), Duration::from_secs(1));
        let payload = synth.synthesize(Some(&metrics())).await;
        assert_eq!(payload.source(), "aiAnalysis");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_statistics() {
        let (service, calls) = flaky(10, server_error);
        let synth = FeedbackSynthesizer::new(Some(service), fast_retry(), Duration::from_secs(1));
        let payload = synth.synthesize(Some(&metrics())).await;
        assert_eq!(payload.source(), "statisticalAnalysis");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let (service, calls) = flaky(10, || FeedbackError::InvalidResponse("garbage".into()));
        let synth = FeedbackSynthesizer::new(Some(service), fast_retry(), Duration::from_secs(1));
        let payload = synth.synthesize(Some(&metrics())).await;
        assert_eq!(payload.source(), "statisticalAnalysis");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_statistics() {
        let (mut service, _) = flaky(0, server_error);
        service.delay = Duration::from_secs(5);
        let synth = FeedbackSynthesizer::new(Some(service), RetryPolicy::none(), Duration::from_millis(20));
        let payload = synth.synthesize(Some(&metrics())).await;
        assert!(matches!(payload, FeedbackPayload::StatisticalAnalysis(_)));
    }

    #[tokio::test]
    async fn test_disabled_service_uses_statistics() {
        let synth = FeedbackSynthesizer::<OpenAiFeedbackService>::new(None, fast_retry(), Duration::from_secs(1));
        assert!(!synth.ai_enabled());
        let payload = synth.synthesize(Some(&metrics())).await;
        match payload {
            FeedbackPayload::StatisticalAnalysis(narrative) => {
                assert!(narrative.summary.starts_with("White played 2 moves"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_metrics_use_error_fallback() {
        let (service, calls) = flaky(0, server_error);
        let synth = FeedbackSynthesizer::new(Some(service), fast_retry(), Duration::from_secs(1));
        let payload = synth.synthesize(None).await;
        assert_eq!(payload.source(), "errorFallback");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut empty = metrics();
        empty.subject = analysis::Side::Black;
        empty.black.moves = 0;
        assert_eq!(synth.synthesize(Some(&empty)).await.source(), "errorFallback");
    }
}
