//! Execution timeout semantics: settle the caller, free the slot, discard
//! (never cancel) the work.

use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// maxConcurrent=1, executionTimeout=50ms, work takes 200ms: the caller is
/// settled with ExecutionTimeout around 50ms, not 200ms.
#[tokio::test]
async fn slow_work_settles_at_the_timeout() {
    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("slow")
            .max_concurrent(1)
            .execution_timeout(Duration::from_millis(50))
            .build(),
    );

    let start = Instant::now();
    let err = bulkhead
        .submit(async {
            sleep(Duration::from_millis(200)).await;
            Ok::<_, ()>(())
        })
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(
        err,
        BulkheadError::ExecutionTimeout { limit } if limit == Duration::from_millis(50)
    ));
    assert!(
        elapsed >= Duration::from_millis(45) && elapsed < Duration::from_millis(150),
        "settled at {elapsed:?}, expected around 50ms"
    );

    let stats = bulkhead.stats();
    assert_eq!(stats.timeout_requests, 1);
    assert_eq!(stats.completed_requests, 0);
}

#[tokio::test]
async fn timed_out_work_keeps_running_in_the_background() {
    let finished = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&finished);

    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("detached")
            .max_concurrent(1)
            .execution_timeout(Duration::from_millis(30))
            .build(),
    );

    let err = bulkhead
        .submit(async move {
            sleep(Duration::from_millis(100)).await;
            f.store(true, Ordering::SeqCst);
            Ok::<_, ()>(())
        })
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(!finished.load(Ordering::SeqCst));

    // The loser of the race was discarded, not cancelled.
    sleep(Duration::from_millis(150)).await;
    assert!(
        finished.load(Ordering::SeqCst),
        "work should have kept running after the caller was settled"
    );
}

#[tokio::test]
async fn timeout_frees_the_slot_for_queued_work() {
    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("freed")
            .max_concurrent(1)
            .max_queue_size(1)
            .queue_timeout(Duration::from_secs(5))
            .execution_timeout(Duration::from_millis(40))
            .build(),
    );

    // First request will time out at ~40ms; the queued one should then run.
    let bh = bulkhead.clone();
    let first = tokio::spawn(async move {
        bh.submit(async {
            sleep(Duration::from_millis(500)).await;
            Ok::<_, ()>("never")
        })
        .await
    });
    sleep(Duration::from_millis(5)).await;

    let start = Instant::now();
    let value = bulkhead
        .submit(async { Ok::<_, ()>("promoted") })
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(value, "promoted");
    assert!(
        elapsed < Duration::from_millis(200),
        "promotion took {elapsed:?}, slot was not freed by the timeout"
    );
    assert!(first.await.unwrap().unwrap_err().is_timeout());
}

#[tokio::test]
async fn fast_work_is_unaffected_by_the_timeout() {
    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("fast")
            .execution_timeout(Duration::from_millis(100))
            .build(),
    );

    let value = bulkhead
        .submit(async {
            sleep(Duration::from_millis(10)).await;
            Ok::<_, ()>(7u32)
        })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(bulkhead.stats().timeout_requests, 0);
}
