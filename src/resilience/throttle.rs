use crate::{Error, ErrorContext, Result};
use futures::future::{join_all, BoxFuture};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Operations run concurrently per batch.
    pub max_concurrent: usize,
    /// Pause between batches. Deliberate backpressure toward the upstream
    /// API, independent of per-operation retry or circuit breaking.
    pub inter_batch_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            inter_batch_delay: Duration::from_millis(200),
        }
    }
}

impl ThrottleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }
}

/// Read-only snapshot of the throttle, for diagnostics.
#[derive(Debug, Clone)]
pub struct ThrottleStats {
    pub queue_len: usize,
    pub is_draining: bool,
    pub max_concurrent: usize,
    pub inter_batch_delay_ms: u64,
}

struct Inner {
    cfg: ThrottleConfig,
    queue: Mutex<VecDeque<Job>>,
    draining: AtomicBool,
}

impl Inner {
    fn queue_guard(&self) -> MutexGuard<'_, VecDeque<Job>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// FIFO admission control for remote operations.
///
/// `execute` enqueues the operation and immediately hands the caller a
/// future for its individual outcome. A single drain loop pops batches of
/// up to `max_concurrent` operations, runs each batch concurrently, and
/// pauses `inter_batch_delay` between batches. One failing operation never
/// fails or blocks its batch-mates.
///
/// The throttle does no failure handling of its own: callers wrap their
/// operations with a circuit breaker and retry policy before enqueueing.
#[derive(Clone)]
pub struct RequestThrottle {
    inner: Arc<Inner>,
}

impl RequestThrottle {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue `op` and await its outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(op().await);
            })
        });
        self.inner.queue_guard().push_back(job);
        self.spawn_drain_if_idle();
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::runtime_with_context(
                "throttled operation dropped before completion",
                ErrorContext::new().with_source("throttle"),
            )),
        }
    }

    /// Start the drain loop unless one is already running. Calling `execute`
    /// mid-drain only enqueues; it never spawns a second loop.
    fn spawn_drain_if_idle(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue_guard().len()
    }

    /// Drop every pending operation. Their callers observe a runtime error.
    pub fn clear_queue(&self) {
        let dropped = {
            let mut queue = self.inner.queue_guard();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "throttle queue cleared");
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            queue_len: self.queue_len(),
            is_draining: self.inner.draining.load(Ordering::SeqCst),
            max_concurrent: self.inner.cfg.max_concurrent,
            inter_batch_delay_ms: self.inner.cfg.inter_batch_delay.as_millis() as u64,
        }
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let batch: Vec<Job> = {
            let mut queue = inner.queue_guard();
            let n = queue.len().min(inner.cfg.max_concurrent.max(1));
            queue.drain(..n).collect()
        };

        if batch.is_empty() {
            inner.draining.store(false, Ordering::SeqCst);
            // An enqueue may have raced the store above and seen the loop as
            // still running; reclaim the drain so its job is not stranded.
            let pending = !inner.queue_guard().is_empty();
            if pending && !inner.draining.swap(true, Ordering::SeqCst) {
                continue;
            }
            return;
        }

        debug!(batch_size = batch.len(), "draining throttle batch");
        join_all(batch.into_iter().map(|job| job())).await;

        let more_pending = !inner.queue_guard().is_empty();
        if more_pending {
            tokio::time::sleep(inner.cfg.inter_batch_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn counting_throttle(max: usize, delay_ms: u64) -> RequestThrottle {
        RequestThrottle::new(
            ThrottleConfig::new()
                .with_max_concurrent(max)
                .with_inter_batch_delay(Duration::from_millis(delay_ms)),
        )
    }

    #[tokio::test]
    async fn test_admission_never_exceeds_max_concurrent() {
        let throttle = counting_throttle(2, 10);
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let t = throttle.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                t.execute(move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.expect("task panicked").expect("operation failed");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_batches_separated_by_delay() {
        let throttle = counting_throttle(2, 50);
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = throttle.clone();
            handles.push(tokio::spawn(async move {
                t.execute(|| async { Ok(()) }).await
            }));
        }
        for h in handles {
            h.await.expect("task panicked").expect("operation failed");
        }
        // 4 ops at max_concurrent=2 means two batches with one pause between.
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_batch_mates() {
        let throttle = counting_throttle(3, 1);
        let t1 = throttle.clone();
        let t2 = throttle.clone();

        let failing = tokio::spawn(async move {
            t1.execute(|| async {
                Err::<(), _>(Error::runtime_with_context(
                    "simulated failure",
                    ErrorContext::new(),
                ))
            })
            .await
        });
        let succeeding = tokio::spawn(async move {
            t2.execute(|| async { Ok(42u32) }).await
        });

        assert!(failing.await.expect("task panicked").is_err());
        assert_eq!(succeeding.await.expect("task panicked").expect("op failed"), 42);
    }

    #[tokio::test]
    async fn test_fifo_admission_order() {
        let throttle = counting_throttle(1, 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let t = throttle.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                t.execute(move || async move {
                    order.lock().expect("lock").push(i);
                    Ok(())
                })
                .await
            }));
            // give the enqueue a chance to land before the next one
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for h in handles {
            h.await.expect("task panicked").expect("operation failed");
        }
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stats_reflect_configuration() {
        let throttle = counting_throttle(3, 150);
        let stats = throttle.stats();
        assert_eq!(stats.max_concurrent, 3);
        assert_eq!(stats.inter_batch_delay_ms, 150);
        assert_eq!(stats.queue_len, 0);
        assert!(!stats.is_draining);
    }
}
