//! Admission control: concurrency bounds and immediate-execution precedence.

use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[tokio::test]
async fn concurrency_bound_is_never_exceeded() {
    let concurrent = Arc::new(AtomicUsize::new(0));
    let observed_max = Arc::new(AtomicUsize::new(0));

    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("bounded")
            .max_concurrent(5)
            .max_queue_size(100)
            .build(),
    );

    let mut handles = vec![];
    for _ in 0..20 {
        let bh = bulkhead.clone();
        let counter = Arc::clone(&concurrent);
        let max = Arc::clone(&observed_max);
        handles.push(tokio::spawn(async move {
            bh.submit(async move {
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(())
            })
            .await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            completed += 1;
        }
    }

    assert_eq!(completed, 20);
    assert!(
        observed_max.load(Ordering::SeqCst) <= 5,
        "observed concurrency {} exceeded the limit",
        observed_max.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn free_slot_means_no_queueing() {
    let queued = Arc::new(AtomicUsize::new(0));
    let q = Arc::clone(&queued);

    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("free-slots")
            .max_concurrent(4)
            .on_queued(move |_| {
                q.fetch_add(1, Ordering::SeqCst);
            })
            .build(),
    );

    // Never more than 4 in flight, so nothing may touch the queue.
    for _ in 0..8 {
        bulkhead
            .submit(async { Ok::<_, ()>(()) })
            .await
            .unwrap();
    }

    assert_eq!(queued.load(Ordering::SeqCst), 0);
    assert_eq!(bulkhead.stats().peak_queue_size, 0);
}

#[tokio::test]
async fn work_error_is_propagated_verbatim() {
    let bulkhead: Bulkhead<()> =
        Bulkhead::new(BulkheadConfig::builder().name("failing").build());

    let err = bulkhead
        .submit(async { Err::<(), _>("connection refused") })
        .await
        .unwrap_err();

    assert_eq!(err.into_execution_error(), Some("connection refused"));

    let stats = bulkhead.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.completed_requests, 0);
}

/// maxConcurrent=2, maxQueueSize=1, four 100ms submissions at t=0:
/// 1-2 run immediately, 3 queues, 4 is rejected, 3 finishes around 200ms.
#[tokio::test]
async fn saturation_scenario_two_slots_one_queued_one_rejected() {
    let bulkhead = Bulkhead::new(
        BulkheadConfig::builder()
            .name("saturation")
            .max_concurrent(2)
            .max_queue_size(1)
            .queue_timeout(Duration::from_secs(5))
            .build(),
    );

    let start = Instant::now();
    let mut handles = vec![];
    for i in 0u32..4 {
        let bh = bulkhead.clone();
        handles.push(tokio::spawn(async move {
            let result = bh
                .submit(async move {
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, ()>(i)
                })
                .await;
            (i, result, start.elapsed())
        }));
        // deterministic submission order
        sleep(Duration::from_millis(5)).await;
    }

    let mut rejected = 0;
    let mut completed = vec![];
    for handle in handles {
        let (i, result, elapsed) = handle.await.unwrap();
        match result {
            Ok(_) => completed.push((i, elapsed)),
            Err(BulkheadError::QueueFull { max_queue_size }) => {
                assert_eq!(max_queue_size, 1);
                assert_eq!(i, 3, "only the fourth submission overflows");
                rejected += 1;
            }
            Err(other) => panic!("unexpected outcome for request {i}: {other:?}"),
        }
    }

    assert_eq!(rejected, 1);
    assert_eq!(completed.len(), 3);
    // The queued request waits for a slot, so it finishes on the second wave.
    let third = completed.iter().find(|(i, _)| *i == 2).unwrap();
    assert!(
        third.1 >= Duration::from_millis(180) && third.1 < Duration::from_millis(400),
        "queued request finished at {:?}, expected around 200ms",
        third.1
    );

    let stats = bulkhead.stats();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.accepted_requests, 3);
    assert_eq!(stats.rejected_requests, 1);
    assert_eq!(stats.peak_concurrency, 2);
    assert_eq!(stats.peak_queue_size, 1);
}
