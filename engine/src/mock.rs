//! Scripted engine for tests - only compiled in test mode or with the mock feature

use crate::{EngineError, EngineFactory, Evaluator, PositionEvaluation, SearchLimit};
use chess::AnalysisScore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = dyn Fn(&str, SearchLimit) -> PositionEvaluation + Send + Sync;

/// Failure injected into the next evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Process died; the engine becomes unhealthy.
    Crash,
    /// Search overran but the engine recovered.
    Timeout,
    /// Unparseable output; the engine becomes unhealthy.
    Malformed,
}

/// Shared counters across every engine a factory creates.
#[derive(Debug, Default)]
pub struct EngineCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    evaluations: AtomicUsize,
    spawned: AtomicUsize,
    limits: Mutex<Vec<SearchLimit>>,
}

impl EngineCounters {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of evaluations observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Completed evaluation calls, failed ones included.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Search limits in the order they were requested.
    pub fn limits_seen(&self) -> Vec<SearchLimit> {
        self.limits
            .lock()
            .map(|limits| limits.clone())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct FailurePlan {
    queued: VecDeque<ScriptedFailure>,
    always: Option<ScriptedFailure>,
    fail_spawn: bool,
}

/// Factory producing [`ScriptedEngine`]s that share one script and one set of counters.
#[derive(Clone)]
pub struct ScriptedFactory {
    script: Arc<Script>,
    latency: Duration,
    counters: Arc<EngineCounters>,
    failures: Arc<Mutex<FailurePlan>>,
}

impl ScriptedFactory {
    pub fn new<S>(script: S) -> Self
    where
        S: Fn(&str, SearchLimit) -> PositionEvaluation + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            latency: Duration::ZERO,
            counters: Arc::new(EngineCounters::default()),
            failures: Arc::new(Mutex::new(FailurePlan::default())),
        }
    }

    /// Every position evaluates to `score` with no best move preference.
    pub fn constant(score: AnalysisScore) -> Self {
        Self::new(move |_, limit| PositionEvaluation {
            score,
            best_move: None,
            principal_variation: Vec::new(),
            depth: match limit {
                SearchLimit::Depth(d) => d,
                SearchLimit::MoveTime(_) => 1,
            },
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        Arc::clone(&self.counters)
    }

    /// Fail the next evaluation served by any engine of this factory.
    pub fn fail_next(&self, failure: ScriptedFailure) {
        if let Ok(mut plan) = self.failures.lock() {
            plan.queued.push_back(failure);
        }
    }

    /// Fail every evaluation until cleared with `None`.
    pub fn fail_always(&self, failure: Option<ScriptedFailure>) {
        if let Ok(mut plan) = self.failures.lock() {
            plan.always = failure;
        }
    }

    /// Make `create` fail, simulating a missing engine binary.
    pub fn fail_spawn(&self, fail: bool) {
        if let Ok(mut plan) = self.failures.lock() {
            plan.fail_spawn = fail;
        }
    }

    fn next_failure(&self) -> Option<ScriptedFailure> {
        let mut plan = self.failures.lock().ok()?;
        plan.queued.pop_front().or(plan.always)
    }
}

impl EngineFactory for ScriptedFactory {
    type Engine = ScriptedEngine;

    async fn create(&self) -> Result<ScriptedEngine, EngineError> {
        let fail_spawn = self
            .failures
            .lock()
            .map(|plan| plan.fail_spawn)
            .unwrap_or(false);
        if fail_spawn {
            return Err(EngineError::Spawn("scripted spawn failure".to_string()));
        }
        self.counters.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedEngine {
            factory: self.clone(),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }
}

/// Engine stand-in answering from the factory's script.
pub struct ScriptedEngine {
    factory: ScriptedFactory,
    healthy: Arc<AtomicBool>,
}

impl Evaluator for ScriptedEngine {
    async fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
    ) -> Result<PositionEvaluation, EngineError> {
        let counters = &self.factory.counters;
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(EngineError::Crashed("scripted engine is down".to_string()));
        }

        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut limits) = counters.limits.lock() {
            limits.push(limit);
        }

        if !self.factory.latency.is_zero() {
            tokio::time::sleep(self.factory.latency).await;
        }

        let result = match self.factory.next_failure() {
            Some(ScriptedFailure::Crash) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(EngineError::Crashed("scripted crash".to_string()))
            }
            Some(ScriptedFailure::Malformed) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(EngineError::MalformedOutput("scripted garbage".to_string()))
            }
            Some(ScriptedFailure::Timeout) => {
                Err(EngineError::EvaluationTimeout(self.factory.latency))
            }
            None => Ok((self.factory.script)(fen, limit)),
        };

        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        counters.evaluations.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn is_healthy(&mut self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn shutdown(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_receives_fen_and_limit() {
        let factory = ScriptedFactory::new(|fen, limit| PositionEvaluation {
            score: AnalysisScore::Centipawns(fen.len() as i32),
            best_move: Some("e2e4".to_string()),
            principal_variation: vec!["e2e4".to_string()],
            depth: match limit {
                SearchLimit::Depth(d) => d,
                SearchLimit::MoveTime(_) => 0,
            },
        });
        let mut engine = factory.create().await.unwrap();
        let eval = engine.evaluate("abcd", SearchLimit::Depth(7)).await.unwrap();
        assert_eq!(eval.score, AnalysisScore::Centipawns(4));
        assert_eq!(eval.depth, 7);
        assert_eq!(factory.counters().limits_seen(), vec![SearchLimit::Depth(7)]);
    }

    #[tokio::test]
    async fn test_fail_always_and_spawn_failure() {
        let factory = ScriptedFactory::constant(AnalysisScore::Centipawns(0));
        factory.fail_always(Some(ScriptedFailure::Timeout));
        let mut engine = factory.create().await.unwrap();
        assert!(engine.evaluate("x", SearchLimit::Depth(1)).await.is_err());
        assert!(engine.evaluate("x", SearchLimit::Depth(1)).await.is_err());
        assert!(engine.is_healthy().await);

        factory.fail_spawn(true);
        assert!(matches!(factory.create().await, Err(EngineError::Spawn(_))));
    }
}
