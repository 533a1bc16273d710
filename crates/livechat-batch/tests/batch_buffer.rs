//! Integration tests for the batching buffer.
//!
//! Timer tests run with `start_paused = true`: the runtime auto-advances the
//! clock whenever every task is idle, so a 60 s period elapses instantly.

use std::sync::Arc;
use std::time::Duration;

use livechat_batch::{BatchBuffer, BatchConfig, FlushMode};
use tokio::sync::Mutex;

// =========================================================================
// Helpers
// =========================================================================

type Flushed = Arc<Mutex<Vec<Vec<u32>>>>;

/// A buffer whose callback records every batch it receives.
fn recording(config: BatchConfig) -> (BatchBuffer<u32>, Flushed) {
    let flushed: Flushed = Arc::default();
    let sink = Arc::clone(&flushed);
    let buffer = BatchBuffer::new(config, move |batch: Vec<u32>| {
        let sink = Arc::clone(&sink);
        async move { sink.lock().await.push(batch) }
    });
    (buffer, flushed)
}

fn config(capacity: usize, mode: FlushMode) -> BatchConfig {
    BatchConfig::new(capacity, Duration::from_secs(60)).with_mode(mode)
}

// =========================================================================
// Capacity trigger
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_capacity_flush_delivers_all_items_once() {
    for mode in [FlushMode::Periodic, FlushMode::Debounce] {
        let (buffer, flushed) = recording(config(4, mode));
        for i in 0..4 {
            buffer.put(i).await;
        }

        assert_eq!(*flushed.lock().await, vec![vec![0, 1, 2, 3]], "{mode:?}");
        assert!(buffer.is_empty().await, "{mode:?}");
        assert_eq!(buffer.metrics().capacity_flushes, 1);
        buffer.free().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_capacity_flushes_preserve_order_across_batches() {
    let (buffer, flushed) = recording(config(3, FlushMode::Periodic));
    for i in 0..7 {
        buffer.put(i).await;
    }
    assert_eq!(*flushed.lock().await, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    assert_eq!(buffer.len().await, 1);
    buffer.free().await;
}

// =========================================================================
// Time trigger
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_periodic_timer_flushes_partial_batch() {
    let (buffer, flushed) = recording(config(10, FlushMode::Periodic));
    for i in 0..9 {
        buffer.put(i).await;
    }
    assert!(flushed.lock().await.is_empty());

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(*flushed.lock().await, vec![(0..9).collect::<Vec<_>>()]);
    assert_eq!(buffer.metrics().timer_flushes, 1);
    buffer.free().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_timer_ignores_arrival_pattern() {
    let (buffer, flushed) = recording(config(100, FlushMode::Periodic));

    buffer.put(1).await;
    tokio::time::sleep(Duration::from_secs(40)).await;
    buffer.put(2).await;
    // 61 s after creation: the first tick has fired despite the recent put.
    tokio::time::sleep(Duration::from_secs(21)).await;

    assert_eq!(*flushed.lock().await, vec![vec![1, 2]]);
    buffer.free().await;
}

#[tokio::test(start_paused = true)]
async fn test_debounce_timer_flushes_partial_batch() {
    let (buffer, flushed) = recording(config(10, FlushMode::Debounce));
    for i in 0..9 {
        buffer.put(i).await;
    }

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(*flushed.lock().await, vec![(0..9).collect::<Vec<_>>()]);
    buffer.free().await;
}

#[tokio::test(start_paused = true)]
async fn test_debounce_restarts_countdown_on_put() {
    let (buffer, flushed) = recording(config(100, FlushMode::Debounce));

    buffer.put(1).await;
    tokio::time::sleep(Duration::from_secs(40)).await;
    buffer.put(2).await;
    tokio::time::sleep(Duration::from_secs(40)).await;
    // 80 s since the first put but only 40 s since the last one.
    assert!(flushed.lock().await.is_empty(), "countdown should restart");

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(*flushed.lock().await, vec![vec![1, 2]]);
    buffer.free().await;
}

#[tokio::test(start_paused = true)]
async fn test_timer_skips_empty_buffer() {
    let (buffer, flushed) = recording(config(10, FlushMode::Periodic));
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(flushed.lock().await.is_empty());
    assert_eq!(buffer.metrics().total_flushes(), 0);
    buffer.free().await;
}

// =========================================================================
// Manual flush and shutdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_must_flush_then_free_delivers_tail() {
    let (buffer, flushed) = recording(config(256, FlushMode::Periodic));
    for i in 0..5 {
        buffer.put(i).await;
    }

    buffer.must_flush().await;
    buffer.free().await;

    assert_eq!(*flushed.lock().await, vec![vec![0, 1, 2, 3, 4]]);
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_empty_buffer_is_noop() {
    let (buffer, flushed) = recording(config(8, FlushMode::Periodic));
    buffer.flush().await;
    buffer.must_flush().await;
    assert!(flushed.lock().await.is_empty());
    assert_eq!(buffer.metrics().manual_flushes, 0);
    buffer.free().await;
}

#[tokio::test(start_paused = true)]
async fn test_free_stops_timer() {
    let (buffer, flushed) = recording(config(8, FlushMode::Periodic));
    buffer.put(1).await;
    buffer.free().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(flushed.lock().await.is_empty(), "no flush after free");
}

#[tokio::test(start_paused = true)]
async fn test_slow_callback_does_not_block_put() {
    let flushed: Flushed = Arc::default();
    let sink = Arc::clone(&flushed);
    let buffer = Arc::new(BatchBuffer::new(
        config(100, FlushMode::Periodic),
        move |batch: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                sink.lock().await.push(batch);
            }
        },
    ));

    buffer.put(1).await;
    let flusher = {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move { buffer.flush().await })
    };
    tokio::task::yield_now().await;

    // The callback is sleeping; put must still complete immediately.
    tokio::time::timeout(Duration::from_millis(1), buffer.put(2))
        .await
        .expect("put should not wait for the callback");

    flusher.await.unwrap();
    assert_eq!(*flushed.lock().await, vec![vec![1]]);
    assert_eq!(buffer.len().await, 1);
}

// =========================================================================
// Metrics
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_metrics_count_items() {
    let (buffer, _flushed) = recording(config(2, FlushMode::Periodic));
    for i in 0..5 {
        buffer.put(i).await;
    }
    buffer.must_flush().await;

    let m = buffer.metrics();
    assert_eq!(m.items_put, 5);
    assert_eq!(m.items_flushed, 5);
    assert_eq!(m.capacity_flushes, 2);
    assert_eq!(m.manual_flushes, 1);
    buffer.free().await;
}
