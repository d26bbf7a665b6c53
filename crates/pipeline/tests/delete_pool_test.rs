//! Integration tests for DeletePool
//!
//! Timing-sensitive tests run on a paused clock, so tokio advances time
//! whenever every task is idle.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shortener_pipeline::{DeletePool, DeletePoolConfig, DeletionRequest, PoolStatus, Task};
use support::{request, LogCapture, RecordingDeleteSink};

fn config() -> DeletePoolConfig {
    DeletePoolConfig::default()
        .with_batch_size(10)
        .with_batch_flush_period(Duration::from_secs(60))
}

async fn start(sink: &Arc<RecordingDeleteSink>, config: DeletePoolConfig) -> DeletePool {
    let pool = DeletePool::new(sink.clone(), config).unwrap();
    pool.start(&CancellationToken::new()).await.unwrap();
    pool
}

// ============================================
// Flush triggers
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_drains_partial_buffer() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(&sink, config()).await;

    pool.submit(request("user-1", 7));
    pool.stop().await;

    assert_eq!(sink.batch_sizes(), vec![7]);
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_size_trigger_splits_into_bounded_batches() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(&sink, config().with_batch_size(5)).await;

    pool.submit(request("user-1", 12));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Two full batches went out on size, two tasks wait for a tick
    assert_eq!(sink.batch_sizes(), vec![5, 5]);
    assert_eq!(pool.buffered(), 2);

    pool.stop().await;

    let sizes = sink.batch_sizes();
    assert!(sizes.len() >= 2);
    assert!(sizes.iter().all(|&size| size <= 5));
    assert_eq!(sink.total_tasks(), 12);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_time_trigger_flushes_without_more_input() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(
        &sink,
        config()
            .with_batch_size(100)
            .with_batch_flush_period(Duration::from_millis(200)),
    )
    .await;

    pool.submit(request("user-1", 3));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(sink.batch_sizes(), vec![3]);

    pool.stop().await;
    assert_eq!(sink.batch_sizes(), vec![3]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_batch_preserves_arrival_order() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(&sink, config().with_max_workers(1)).await;

    pool.submit(DeletionRequest::new(
        "user-1",
        vec!["c".to_string(), "a".to_string(), "b".to_string()],
    ));
    pool.stop().await;

    assert_eq!(
        sink.batches(),
        vec![vec![
            Task::new("c", "user-1"),
            Task::new("a", "user-1"),
            Task::new("b", "user-1"),
        ]]
    );
}

// ============================================
// Delivery and backpressure
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_every_accepted_task_reaches_sink_once() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(&sink, config().with_batch_size(4)).await;

    for user in 0..20 {
        pool.submit(request(&format!("user-{user}"), 3));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.stop().await;

    let delivered: Vec<Task> = sink.batches().into_iter().flatten().collect();
    assert_eq!(delivered.len(), 60);

    let unique: HashSet<Task> = delivered.into_iter().collect();
    assert_eq!(unique.len(), 60);
    assert!(sink.batch_sizes().iter().all(|&size| size <= 4));
}

#[tokio::test(start_paused = true)]
async fn test_full_request_queue_drops_without_blocking() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = DeletePool::new(sink.clone(), config().with_request_queue_capacity(2)).unwrap();

    // Not started yet, so nothing consumes the queue
    let started = tokio::time::Instant::now();
    for _ in 0..10 {
        pool.submit(request("user-1", 1));
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(pool.backlog(), 2);
    assert_eq!(logs.warnings_containing("Request queue full"), 8);

    pool.start(&CancellationToken::new()).await.unwrap();
    pool.stop().await;

    assert_eq!(sink.total_tasks(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_full_task_queue_drops_while_running() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(
        &sink,
        config().with_task_queue_capacity(4).with_batch_size(100),
    )
    .await;

    // Expanded in one pass while running, before the batcher reads anything
    pool.submit(request("user-1", 10));
    tokio::time::sleep(Duration::from_millis(10)).await;
    pool.stop().await;

    assert_eq!(sink.total_tasks(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_forwards_queued_requests_beyond_task_capacity() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(
        &sink,
        config().with_task_queue_capacity(10).with_batch_size(100),
    )
    .await;

    for user in 0..4 {
        pool.submit(request(&format!("user-{user}"), 5));
    }
    pool.stop().await;

    assert_eq!(sink.total_tasks(), 20);
    assert_eq!(sink.batch_sizes(), vec![20]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_flushes_requests_left_without_workers() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let pool = DeletePool::new(sink.clone(), config()).unwrap();
    pool.submit(request("user-1", 3));
    pool.submit(request("user-2", 2));

    // Scope already cancelled, so no worker is ever launched
    pool.start(&shutdown).await.unwrap();
    assert_eq!(pool.active_workers(), 0);

    pool.stop().await;
    assert_eq!(sink.total_tasks(), 5);
}

// ============================================
// Sink failures
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_batch_is_not_retried() {
    let sink = Arc::new(RecordingDeleteSink::failing_first(1));
    let pool = start(&sink, config().with_batch_size(2)).await;

    pool.submit(request("user-1", 4));
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.stop().await;

    assert_eq!(sink.attempts(), 2);
    assert_eq!(sink.batch_sizes(), vec![2]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_slow_sink_times_out() {
    let sink = Arc::new(RecordingDeleteSink::with_delay(Duration::from_secs(60)));
    let pool = start(
        &sink,
        config()
            .with_batch_size(2)
            .with_sink_timeout(Duration::from_secs(1))
            .with_shutdown_timeout(Duration::from_secs(30)),
    )
    .await;

    pool.submit(request("user-1", 3));
    pool.stop().await;

    assert_eq!(sink.attempts(), 2);
    assert!(sink.batches().is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_is_bounded_by_shutdown_timeout() {
    let sink = Arc::new(RecordingDeleteSink::with_delay(Duration::from_secs(3600)));
    let pool = start(
        &sink,
        config()
            .with_batch_size(2)
            .with_sink_timeout(Duration::from_secs(600))
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .await;

    pool.submit(request("user-1", 20));

    let started = tokio::time::Instant::now();
    pool.stop().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert_eq!(sink.attempts(), 1);
    assert!(sink.batches().is_empty());
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stop_waits_for_in_flight_size_flush() {
    let sink = Arc::new(RecordingDeleteSink::with_delay(Duration::from_secs(2)));
    let pool = start(&sink, config().with_batch_size(3)).await;

    pool.submit(request("user-1", 3));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.attempts(), 1);

    pool.stop().await;
    assert_eq!(sink.batch_sizes(), vec![3]);
}

// ============================================
// Lifecycle and scaling
// ============================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_concurrent_stop_is_idempotent() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = Arc::new(start(&sink, config()).await);
    pool.submit(request("user-1", 5));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.stop().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    pool.stop().await;

    assert_eq!(sink.batch_sizes(), vec![5]);
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_parent_cancellation_drains_buffer() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let shutdown = CancellationToken::new();
    let pool = DeletePool::new(sink.clone(), config()).unwrap();
    pool.start(&shutdown).await.unwrap();

    pool.submit(request("user-1", 4));
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(sink.batch_sizes(), vec![4]);
    pool.stop().await;
    assert_eq!(sink.batch_sizes(), vec![4]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_worker_count_never_exceeds_max() {
    let sink = Arc::new(RecordingDeleteSink::new());
    let pool = start(&sink, config().with_max_workers(2)).await;

    for round in 0..6 {
        for _ in 0..50 {
            pool.submit(request(&format!("user-{round}"), 1));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(pool.active_workers() <= 2);
    }

    pool.stop().await;
    assert_eq!(pool.active_workers(), 0);
}
