//! Size-or-time batching buffer for livechat.
//!
//! [`BatchBuffer`] accumulates items and hands them to an async callback
//! when either `capacity` items are held or the flush timer fires,
//! whichever comes first. It is generic over the item type, so one
//! implementation serves every event kind a consumer wants to batch.
//!
//! # Timing
//!
//! Two disciplines are available through [`FlushMode`]:
//!
//! - [`FlushMode::Periodic`] flushes every `period`, independent of when
//!   items arrive.
//! - [`FlushMode::Debounce`] restarts the countdown on every
//!   [`put`](BatchBuffer::put) and flushes once `period` has passed without
//!   a new item.
//!
//! # Shutdown
//!
//! ```ignore
//! buffer.must_flush().await; // deliver the tail batch
//! buffer.free().await;       // stop the timer
//! ```
//!
//! Dropping a buffer without [`free`](BatchBuffer::free) aborts the timer but
//! does not deliver what is still held.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the flush timer relates to incoming items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Fixed interval, independent of the arrival pattern.
    #[default]
    Periodic,
    /// The countdown restarts on every `put`.
    Debounce,
}

/// Full configuration for a [`BatchBuffer`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Item count that triggers a synchronous flush inside `put`.
    pub capacity: usize,
    /// Time threshold for the timer-driven flush.
    pub period: Duration,
    pub mode: FlushMode,
    /// Random delay (0..max) added to the *first* periodic deadline so
    /// buffers created together do not all flush in the same instant.
    pub initial_jitter: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            period: Self::DEFAULT_PERIOD,
            mode: FlushMode::default(),
            initial_jitter: Duration::ZERO,
        }
    }
}

impl BatchConfig {
    pub const DEFAULT_CAPACITY: usize = 256;
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);
    /// Shortest accepted period.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    pub fn new(capacity: usize, period: Duration) -> Self {
        Self {
            capacity,
            period,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: FlushMode) -> Self {
        self.mode = mode;
        self
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`BatchBuffer::new`]. Rules:
    /// - `capacity` is at least 1.
    /// - `period` is at least [`Self::MIN_PERIOD`].
    pub fn validated(mut self) -> Self {
        if self.capacity == 0 {
            warn!("batch capacity is 0, using 1");
            self.capacity = 1;
        }
        if self.period < Self::MIN_PERIOD {
            warn!(period = ?self.period, "batch period too short, clamping");
            self.period = Self::MIN_PERIOD;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Snapshot of a buffer's flush counters.
///
/// Only non-empty flushes are counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchMetrics {
    /// Items accepted by `put`.
    pub items_put: u64,
    /// Items handed to the callback.
    pub items_flushed: u64,
    /// Flushes triggered by reaching capacity.
    pub capacity_flushes: u64,
    /// Flushes triggered by the timer.
    pub timer_flushes: u64,
    /// Flushes requested through `flush` or `must_flush`.
    pub manual_flushes: u64,
}

impl BatchMetrics {
    pub fn total_flushes(&self) -> u64 {
        self.capacity_flushes + self.timer_flushes + self.manual_flushes
    }
}

#[derive(Debug, Default)]
struct Counters {
    items_put: AtomicU64,
    items_flushed: AtomicU64,
    capacity_flushes: AtomicU64,
    timer_flushes: AtomicU64,
    manual_flushes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BatchMetrics {
        BatchMetrics {
            items_put: self.items_put.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
            capacity_flushes: self.capacity_flushes.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Capacity,
    Timer,
    Manual,
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

type FlushFn<T> = dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync;

struct Shared<T> {
    items: Mutex<Vec<T>>,
    /// Serializes flushes so batches reach the callback in put order.
    flush_lock: Mutex<()>,
    on_flush: Box<FlushFn<T>>,
    capacity: usize,
    /// Signalled on every put; only the debounce timer listens.
    activity: Notify,
    counters: Counters,
}

impl<T: Send + 'static> Shared<T> {
    /// Swaps out the held items and runs the callback outside the items lock.
    async fn flush(&self, reason: FlushReason) {
        let _serial = self.flush_lock.lock().await;
        let batch = std::mem::take(&mut *self.items.lock().await);
        if batch.is_empty() {
            return;
        }

        let n = batch.len() as u64;
        let counter = match reason {
            FlushReason::Capacity => &self.counters.capacity_flushes,
            FlushReason::Timer => &self.counters.timer_flushes,
            FlushReason::Manual => &self.counters.manual_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters.items_flushed.fetch_add(n, Ordering::Relaxed);
        trace!(items = n, ?reason, "flushing batch");

        (self.on_flush)(batch).await;
    }
}

/// Generic accumulator flushed by size or by time.
///
/// Items are held in arrival order and each flush delivers them in that
/// order. Once a `put` brings the held count to `capacity`, that `put` does
/// not return until the batch has been handed to the callback.
pub struct BatchBuffer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    config: BatchConfig,
    shutdown: Option<oneshot::Sender<()>>,
    timer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> BatchBuffer<T> {
    /// Create a buffer and start its timer. Must be called inside a Tokio
    /// runtime.
    pub fn new<F, Fut>(config: BatchConfig, on_flush: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let config = config.validated();
        let shared = Arc::new(Shared {
            items: Mutex::new(Vec::with_capacity(config.capacity)),
            flush_lock: Mutex::new(()),
            on_flush: Box::new(move |batch| on_flush(batch).boxed()),
            capacity: config.capacity,
            activity: Notify::new(),
            counters: Counters::default(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let timer = tokio::spawn(run_timer(Arc::clone(&shared), config.clone(), shutdown_rx));

        debug!(
            capacity = config.capacity,
            period_ms = config.period.as_millis() as u64,
            mode = ?config.mode,
            "batch buffer created"
        );

        Self {
            shared,
            config,
            shutdown: Some(shutdown_tx),
            timer: Some(timer),
        }
    }

    /// Append an item, flushing synchronously if capacity is reached.
    pub async fn put(&self, item: T) {
        let full = {
            let mut items = self.shared.items.lock().await;
            items.push(item);
            items.len() >= self.shared.capacity
        };
        self.shared.counters.items_put.fetch_add(1, Ordering::Relaxed);
        if self.config.mode == FlushMode::Debounce {
            self.shared.activity.notify_one();
        }
        if full {
            self.shared.flush(FlushReason::Capacity).await;
        }
    }

    /// Deliver whatever is held now. No-op when empty.
    pub async fn flush(&self) {
        self.shared.flush(FlushReason::Manual).await;
    }

    /// Force an immediate flush regardless of size. Call before
    /// [`free`](Self::free) so the tail batch is not lost.
    pub async fn must_flush(&self) {
        let held = self.len().await;
        debug!(held, "forced flush");
        self.shared.flush(FlushReason::Manual).await;
    }

    /// Stop the timer and release the buffer.
    ///
    /// Held items are dropped, not flushed. A timer flush already running
    /// completes before this returns.
    pub async fn free(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(timer) = self.timer.take() {
            if let Err(e) = timer.await {
                warn!(error = %e, "batch timer task failed");
            }
        }
        let dropped = self.len().await;
        if dropped > 0 {
            warn!(dropped, "batch buffer freed with unflushed items");
        }
    }

    /// Number of items currently held.
    pub async fn len(&self) -> usize {
        self.shared.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}

impl<T: Send + 'static> Drop for BatchBuffer<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Timer task
// ---------------------------------------------------------------------------

async fn run_timer<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    config: BatchConfig,
    mut shutdown: oneshot::Receiver<()>,
) {
    match config.mode {
        FlushMode::Periodic => {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_micros() as u64;
                Duration::from_micros(rand::rng().random_range(0..max))
            };
            let start = Instant::now() + config.period + jitter;
            let mut ticker = time::interval_at(start, config.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = ticker.tick() => shared.flush(FlushReason::Timer).await,
                }
            }
        }
        FlushMode::Debounce => {
            // Disarmed until the first put.
            let mut deadline: Option<Instant> = None;
            loop {
                let armed = deadline;
                let sleep = async move {
                    match armed {
                        Some(at) => time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = shared.activity.notified() => {
                        deadline = Some(Instant::now() + config.period);
                    }
                    _ = sleep => {
                        deadline = None;
                        shared.flush(FlushReason::Timer).await;
                    }
                }
            }
        }
    }
    trace!("batch timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_clamps_zero_values() {
        let cfg = BatchConfig::new(0, Duration::ZERO).validated();
        assert_eq!(cfg.capacity, 1);
        assert_eq!(cfg.period, BatchConfig::MIN_PERIOD);
    }

    #[test]
    fn test_default_config() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.capacity, 256);
        assert_eq!(cfg.period, Duration::from_secs(60));
        assert_eq!(cfg.mode, FlushMode::Periodic);
    }

    #[test]
    fn test_total_flushes_sums_reasons() {
        let m = BatchMetrics {
            capacity_flushes: 1,
            timer_flushes: 2,
            manual_flushes: 3,
            ..Default::default()
        };
        assert_eq!(m.total_flushes(), 6);
    }
}
