//! Bounded pool of engine adapters.
//!
//! Capacity is fixed at construction. A semaphore permit is held for the whole
//! life of an [`EngineLease`], so no more than `capacity` evaluations can run at
//! once and no more than `capacity` adapters ever exist.

use crate::{EngineError, EngineFactory, Evaluator, PositionEvaluation, SearchLimit};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub spawned: u64,
    pub retired: u64,
}

struct PoolInner<F: EngineFactory> {
    factory: F,
    capacity: usize,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<F::Engine>>,
    spawned: AtomicU64,
    retired: AtomicU64,
}

impl<F: EngineFactory> PoolInner<F> {
    fn idle(&self) -> MutexGuard<'_, Vec<F::Engine>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn spawn_engine(&self) -> Result<F::Engine, EngineError> {
        let engine = self.factory.create().await?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(engine)
    }

    async fn retire(&self, engine: F::Engine) {
        self.retired.fetch_add(1, Ordering::Relaxed);
        engine.shutdown().await;
    }

    /// Reuse a healthy idle adapter, retiring unhealthy ones, or spawn a fresh one.
    async fn acquire_engine(&self) -> Result<F::Engine, EngineError> {
        loop {
            let candidate = self.idle().pop();
            match candidate {
                Some(mut engine) => {
                    if engine.is_healthy().await {
                        return Ok(engine);
                    }
                    tracing::warn!("Retiring unhealthy idle engine");
                    self.retire(engine).await;
                }
                None => return self.spawn_engine().await,
            }
        }
    }
}

/// Fixed-capacity pool handing out exclusive engine leases.
pub struct EnginePool<F: EngineFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: EngineFactory> Clone for EnginePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: EngineFactory> EnginePool<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                capacity,
                slots: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(Vec::with_capacity(capacity)),
                spawned: AtomicU64::new(0),
                retired: AtomicU64::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Wait for a free slot and hand out an engine for exclusive use.
    pub async fn checkout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EngineLease<F>, EngineError> {
        let slots = Arc::clone(&self.inner.slots);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            acquired = tokio::time::timeout(timeout, slots.acquire_owned()) => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(EngineError::ShutDown),
                Err(_) => return Err(EngineError::CheckoutTimeout(timeout)),
            },
        };

        let engine = self.inner.acquire_engine().await?;
        tracing::trace!("Engine checked out");
        Ok(EngineLease {
            engine: Some(engine),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Pre-spawn adapters into every free slot.
    pub async fn warm_up(&self) -> Result<usize, EngineError> {
        let mut permits = Vec::new();
        while let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() {
            permits.push(permit);
        }

        let missing = permits.len().saturating_sub(self.inner.idle().len());
        for _ in 0..missing {
            let engine = self.inner.spawn_engine().await?;
            self.inner.idle().push(engine);
        }
        tracing::info!(spawned = missing, capacity = self.inner.capacity, "Engine pool warmed up");
        Ok(missing)
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle().len();
        PoolStats {
            capacity: self.inner.capacity,
            idle,
            checked_out: self.inner.capacity - self.inner.slots.available_permits(),
            spawned: self.inner.spawned.load(Ordering::Relaxed),
            retired: self.inner.retired.load(Ordering::Relaxed),
        }
    }

    /// Refuse further checkouts and stop idle engines. Leased engines are
    /// stopped when their lease is dropped.
    pub async fn shutdown(&self) {
        self.inner.slots.close();
        let idle: Vec<F::Engine> = std::mem::take(&mut *self.inner.idle());
        let count = idle.len();
        for engine in idle {
            engine.shutdown().await;
        }
        tracing::info!(stopped = count, "Engine pool shut down");
    }
}

/// Exclusive use of one pooled engine. Dropping the lease returns the engine.
pub struct EngineLease<F: EngineFactory> {
    engine: Option<F::Engine>,
    pool: Arc<PoolInner<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: EngineFactory> EngineLease<F> {
    /// Evaluate one position. An engine that is no longer healthy after a
    /// failure is retired, and later calls on this lease return `Retired`.
    pub async fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
    ) -> Result<PositionEvaluation, EngineError> {
        let engine = self.engine.as_mut().ok_or(EngineError::Retired)?;
        match engine.evaluate(fen, limit).await {
            Ok(evaluation) => Ok(evaluation),
            Err(err) => {
                if !engine.is_healthy().await {
                    tracing::warn!(error = %err, "Retiring failed engine");
                    if let Some(engine) = self.engine.take() {
                        self.pool.retire(engine).await;
                    }
                }
                Err(err)
            }
        }
    }

    pub fn is_retired(&self) -> bool {
        self.engine.is_none()
    }

    /// Return the engine to the pool.
    pub fn release(self) {}
}

impl<F: EngineFactory> Drop for EngineLease<F> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if self.pool.slots.is_closed() {
                // Pool is shutting down.
                drop(engine);
            } else {
                self.pool.idle().push(engine);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedFactory, ScriptedFailure};
    use chess::AnalysisScore;

    fn pool(capacity: usize) -> (EnginePool<ScriptedFactory>, ScriptedFactory) {
        let factory = ScriptedFactory::constant(AnalysisScore::Centipawns(20));
        (EnginePool::new(factory.clone(), capacity), factory)
    }

    #[tokio::test]
    async fn test_lease_reuses_engine() {
        let (pool, factory) = pool(1);
        let token = CancellationToken::new();

        let mut lease = pool.checkout(Duration::from_secs(1), &token).await.unwrap();
        let eval = lease.evaluate("fen", SearchLimit::Depth(10)).await.unwrap();
        assert_eq!(eval.score, AnalysisScore::Centipawns(20));
        lease.release();

        let _lease = pool.checkout(Duration::from_secs(1), &token).await.unwrap();
        assert_eq!(factory.counters().spawned(), 1);
        assert_eq!(pool.stats().checked_out, 1);
    }

    #[tokio::test]
    async fn test_checkout_times_out_when_exhausted() {
        let (pool, _) = pool(1);
        let token = CancellationToken::new();
        let _held = pool.checkout(Duration::from_secs(1), &token).await.unwrap();

        let err = pool
            .checkout(Duration::from_millis(20), &token)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::CheckoutTimeout(_)));
    }

    #[tokio::test]
    async fn test_checkout_cancelled() {
        let (pool, _) = pool(1);
        let token = CancellationToken::new();
        let _held = pool.checkout(Duration::from_secs(1), &token).await.unwrap();

        let waiter = CancellationToken::new();
        waiter.cancel();
        let err = pool
            .checkout(Duration::from_secs(5), &waiter)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_crashed_engine_is_retired_and_replaced() {
        let (pool, factory) = pool(1);
        let token = CancellationToken::new();
        factory.fail_next(ScriptedFailure::Crash);

        let mut lease = pool.checkout(Duration::from_secs(1), &token).await.unwrap();
        let err = lease.evaluate("fen", SearchLimit::Depth(5)).await.unwrap_err();
        assert!(matches!(err, EngineError::Crashed(_)));
        assert!(lease.is_retired());
        assert!(matches!(
            lease.evaluate("fen", SearchLimit::Depth(5)).await,
            Err(EngineError::Retired)
        ));
        drop(lease);

        let mut lease = pool.checkout(Duration::from_secs(1), &token).await.unwrap();
        assert!(lease.evaluate("fen", SearchLimit::Depth(5)).await.is_ok());
        assert_eq!(factory.counters().spawned(), 2);
        assert_eq!(pool.stats().retired, 1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_healthy_engine() {
        let (pool, factory) = pool(1);
        let token = CancellationToken::new();
        factory.fail_next(ScriptedFailure::Timeout);

        let mut lease = pool.checkout(Duration::from_secs(1), &token).await.unwrap();
        assert!(matches!(
            lease.evaluate("fen", SearchLimit::Depth(5)).await,
            Err(EngineError::EvaluationTimeout(_))
        ));
        assert!(!lease.is_retired());
        assert!(lease.evaluate("fen", SearchLimit::Depth(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_capacity() {
        let factory = ScriptedFactory::constant(AnalysisScore::Centipawns(0))
            .with_latency(Duration::from_millis(10));
        let pool = EnginePool::new(factory.clone(), 3);
        let token = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..3 {
                    let mut lease = pool.checkout(Duration::from_secs(5), &token).await.unwrap();
                    lease.evaluate("fen", SearchLimit::Depth(1)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let counters = factory.counters();
        assert!(counters.peak_in_flight() <= 3);
        assert_eq!(counters.evaluations(), 36);
        assert!(counters.spawned() <= 3);
    }

    #[tokio::test]
    async fn test_warm_up_and_shutdown() {
        let (pool, factory) = pool(2);
        assert_eq!(pool.warm_up().await.unwrap(), 2);
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(factory.counters().spawned(), 2);

        pool.shutdown().await;
        assert_eq!(pool.stats().idle, 0);
        let token = CancellationToken::new();
        assert!(matches!(
            pool.checkout(Duration::from_millis(10), &token).await,
            Err(EngineError::ShutDown)
        ));
    }
}
