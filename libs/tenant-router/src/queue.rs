//! Work queue and worker pool driving slug reconciliation (spec §4.2).
//!
//! Single-flight: a worker that finds a slug already in progress drops the
//! duplicate trigger rather than queuing it — the ongoing, level-triggered
//! reconciliation pass is taken as the truth for that slug.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tr_common::ratelimit::RateLimiter;
use tracing::{error, info, warn};

pub const CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_WORKERS: usize = 3;
pub const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

/// Outcome of one reconcile attempt, replacing exceptions with explicit
/// requeue instructions (spec §4.3 "ReconcileOutcome").
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }
}

pub trait Reconciler: Send + Sync + 'static {
    fn reconcile(
        &self,
        slug: &str,
    ) -> impl std::future::Future<Output = tr_common::Result<ReconcileOutcome>> + Send;

    /// Called once a slug is dropped after exhausting `MAX_ATTEMPTS` retries
    /// (spec §4.2 rule 3). Default is a no-op; implementors that persist
    /// state should record the failure here.
    fn on_exhausted(
        &self,
        _slug: &str,
        _error: &tr_common::Error,
    ) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Clone)]
struct WorkItem {
    slug: String,
    attempt: u32,
}

#[derive(Default)]
pub struct QueueMetricsSnapshot {
    pub enqueued_total: u64,
    pub processed_total: u64,
    pub retried_total: u64,
    pub exhausted_total: u64,
    pub in_progress: u64,
}

#[derive(Default)]
struct Counters {
    enqueued_total: AtomicU64,
    processed_total: AtomicU64,
    retried_total: AtomicU64,
    exhausted_total: AtomicU64,
}

struct Coalescer {
    /// Slugs currently sitting in the channel, not yet picked up.
    queued: HashSet<String>,
    /// Slugs a worker is actively reconciling right now.
    in_progress: HashSet<String>,
}

/// Returned when the bounded work queue is at capacity (spec §8 boundary:
/// "101st enqueue returns 'queue full' without blocking").
#[derive(Debug, Clone, Copy)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue full")
    }
}

impl std::error::Error for QueueFull {}

pub struct Queue {
    tx: mpsc::Sender<WorkItem>,
    coalescer: Arc<Mutex<Coalescer>>,
    counters: Arc<Counters>,
}

impl Queue {
    /// Enqueue `slug` for reconciliation. Dropped silently if `slug` is
    /// already queued or in progress (spec §4.2 rule 1). Never blocks: a
    /// full channel is rejected with `QueueFull` instead of applying
    /// backpressure to the caller (spec §4.2 / §8).
    pub async fn enqueue(&self, slug: &str) -> Result<(), QueueFull> {
        let mut guard = self.coalescer.lock().await;
        if guard.in_progress.contains(slug) || guard.queued.contains(slug) {
            return Ok(());
        }
        guard.queued.insert(slug.to_string());
        drop(guard);

        match self.tx.try_send(WorkItem {
            slug: slug.to_string(),
            attempt: 0,
        }) {
            Ok(()) => {
                self.counters.enqueued_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.coalescer.lock().await.queued.remove(slug);
                warn!(msg = "work queue full, rejecting enqueue", slug);
                Err(QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.coalescer.lock().await.queued.remove(slug);
                warn!(msg = "queue closed, dropping enqueue", slug);
                Err(QueueFull)
            }
        }
    }

    pub async fn metrics(&self) -> QueueMetricsSnapshot {
        let guard = self.coalescer.lock().await;
        QueueMetricsSnapshot {
            enqueued_total: self.counters.enqueued_total.load(Ordering::Relaxed),
            processed_total: self.counters.processed_total.load(Ordering::Relaxed),
            retried_total: self.counters.retried_total.load(Ordering::Relaxed),
            exhausted_total: self.counters.exhausted_total.load(Ordering::Relaxed),
            in_progress: guard.in_progress.len() as u64,
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let mut backoff = ExponentialBuilder::default()
        .with_min_delay(BACKOFF_BASE)
        .with_max_delay(BACKOFF_CAP)
        .with_factor(2.0)
        .without_max_times()
        .build();
    let mut delay = BACKOFF_BASE;
    for _ in 0..=attempt {
        delay = backoff.next().unwrap_or(BACKOFF_CAP);
    }
    delay
}

/// Spawn `worker_count` workers draining the queue, plus the queue handle
/// used to submit work. Workers stop once `cancel` fires and the channel
/// drains.
pub fn spawn<R: Reconciler>(
    reconciler: Arc<R>,
    limiter: Arc<RateLimiter>,
    worker_count: usize,
    cancel: CancellationToken,
    tasks: &mut JoinSet<()>,
) -> Arc<Queue> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let queue = Arc::new(Queue {
        tx,
        coalescer: Arc::new(Mutex::new(Coalescer {
            queued: HashSet::new(),
            in_progress: HashSet::new(),
        })),
        counters: Arc::new(Counters::default()),
    });

    let rx = Arc::new(Mutex::new(rx));
    for worker_id in 0..worker_count.max(1) {
        let rx = rx.clone();
        let reconciler = reconciler.clone();
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        let queue = queue.clone();
        tasks.spawn(async move {
            worker_loop(worker_id, rx, reconciler, limiter, cancel, queue).await;
        });
    }

    queue
}

async fn worker_loop<R: Reconciler>(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    reconciler: Arc<R>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    queue: Arc<Queue>,
) {
    loop {
        let item = {
            let mut rx = rx.lock().await;
            tokio::select! {
                item = rx.recv() => item,
                _ = cancel.cancelled() => None,
            }
        };
        let Some(item) = item else {
            info!(msg = "queue worker stopping", worker_id);
            return;
        };

        {
            let mut guard = queue.coalescer.lock().await;
            guard.queued.remove(&item.slug);
            guard.in_progress.insert(item.slug.clone());
        }

        if !limiter.wait(&cancel).await {
            let mut guard = queue.coalescer.lock().await;
            guard.in_progress.remove(&item.slug);
            return;
        }

        process_item(item, &reconciler, &queue, &cancel).await;
    }
}

async fn process_item<R: Reconciler>(
    item: WorkItem,
    reconciler: &Arc<R>,
    queue: &Arc<Queue>,
    cancel: &CancellationToken,
) {
    let slug = item.slug.clone();
    let result = reconciler.reconcile(&slug).await;
    queue
        .counters
        .processed_total
        .fetch_add(1, Ordering::Relaxed);

    let mut requeue_after = None;
    match result {
        Ok(outcome) => {
            if outcome.requeue {
                requeue_after = Some(outcome.requeue_after.unwrap_or(BACKOFF_BASE));
            }
        }
        Err(e) if e.is_idempotent_success() => {
            info!(msg = "reconcile treated as already satisfied", slug, %e);
        }
        Err(e) if e.is_retryable() && item.attempt + 1 < MAX_ATTEMPTS => {
            let delay = backoff_for(item.attempt);
            warn!(
                msg = "reconcile failed, scheduling retry",
                slug,
                attempt = item.attempt + 1,
                delay_secs = delay.as_secs(),
                %e
            );
            queue.counters.retried_total.fetch_add(1, Ordering::Relaxed);
            requeue_after = Some(delay);
        }
        Err(e) => {
            error!(msg = "reconcile exhausted retries or is terminal", slug, attempt = item.attempt, %e);
            if !e.is_retryable() {
                warn!(msg = "reconcile failed with non-retryable error", slug, %e);
            } else {
                queue
                    .counters
                    .exhausted_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            reconciler.on_exhausted(&slug, &e).await;
        }
    }

    {
        let mut guard = queue.coalescer.lock().await;
        guard.in_progress.remove(&slug);
    }

    if let Some(delay) = requeue_after {
        let queue = queue.clone();
        let slug = slug.clone();
        let cancel = cancel.clone();
        let next_attempt = item.attempt + 1;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return,
            }
            let mut guard = queue.coalescer.lock().await;
            if guard.in_progress.contains(&slug) || guard.queued.contains(&slug) {
                return;
            }
            guard.queued.insert(slug.clone());
            drop(guard);
            match queue.tx.try_send(WorkItem {
                slug: slug.clone(),
                attempt: next_attempt,
            }) {
                Ok(()) => {
                    queue.counters.enqueued_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    queue.coalescer.lock().await.queued.remove(&slug);
                    warn!(msg = "work queue full, dropping backoff requeue", slug);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingReconciler {
        calls: AtomicUsize,
    }

    impl Reconciler for CountingReconciler {
        async fn reconcile(&self, _slug: &str) -> tr_common::Result<ReconcileOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(ReconcileOutcome::done())
        }
    }

    #[tokio::test]
    async fn enqueue_processes_and_updates_metrics() {
        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
        });
        let limiter = RateLimiter::new(100, 100);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let queue = spawn(reconciler.clone(), limiter, 2, cancel.clone(), &mut tasks);

        queue.enqueue("tenant-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = queue.metrics().await;
        assert_eq!(snapshot.processed_total, 1);
        assert_eq!(reconciler.calls.load(Ordering::Relaxed), 1);

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_coalesced() {
        let reconciler = Arc::new(CountingReconciler {
            calls: AtomicUsize::new(0),
        });
        let limiter = RateLimiter::new(100, 100);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let queue = spawn(reconciler.clone(), limiter, 1, cancel.clone(), &mut tasks);

        queue.enqueue("tenant-b").await.unwrap();
        queue.enqueue("tenant-b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.metrics().await.enqueued_total, 1);

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[tokio::test]
    async fn enqueue_rejects_without_blocking_when_full() {
        // Build a queue with no worker draining it, so the channel fills up
        // and the next enqueue must reject rather than block.
        const CAPACITY: usize = 2;
        let (tx, _rx) = mpsc::channel(CAPACITY);
        let queue = Queue {
            tx,
            coalescer: Arc::new(Mutex::new(Coalescer {
                queued: HashSet::new(),
                in_progress: HashSet::new(),
            })),
            counters: Arc::new(Counters::default()),
        };

        for i in 0..CAPACITY {
            queue.enqueue(&format!("tenant-{i}")).await.unwrap();
        }
        let result = tokio::time::timeout(Duration::from_millis(50), queue.enqueue("one-too-many"))
            .await
            .expect("enqueue must not block when the channel is full");
        assert!(result.is_err());
    }

    #[test]
    fn backoff_is_increasing_and_capped() {
        let first = backoff_for(0);
        let later = backoff_for(10);
        assert!(first <= later);
        assert!(later <= BACKOFF_CAP);
    }
}
