//! Stress tests for the serialized processing queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_engine::{ProcessingQueue, QueueError};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mutual exclusion
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn units_never_overlap() {
    let queue = Arc::new(ProcessingQueue::new());
    let busy = Arc::new(AtomicBool::new(false));
    let ran = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let queue = Arc::clone(&queue);
        let busy = Arc::clone(&busy);
        let ran = Arc::clone(&ran);
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                let busy = Arc::clone(&busy);
                let ran = Arc::clone(&ran);
                queue
                    .enqueue_blocking(
                        move || {
                            assert!(!busy.swap(true, Ordering::SeqCst), "units overlapped");
                            std::thread::sleep(Duration::from_micros(50));
                            ran.fetch_add(1, Ordering::SeqCst);
                            busy.store(false, Ordering::SeqCst);
                        },
                        None,
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(ran.load(Ordering::SeqCst), 16 * 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_counter_is_strictly_increasing() {
    let queue = Arc::new(ProcessingQueue::new());
    let counter = Arc::new(Mutex::new(0u64));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let queue = Arc::clone(&queue);
        let counter = Arc::clone(&counter);
        let seen = Arc::clone(&seen);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                let counter = Arc::clone(&counter);
                let seen = Arc::clone(&seen);
                queue
                    .enqueue(
                        async move {
                            let value = {
                                let mut counter = counter.lock().unwrap();
                                *counter += 1;
                                *counter
                            };
                            tokio::task::yield_now().await;
                            seen.lock().unwrap().push(value);
                        },
                        None,
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 500);
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn failed_units_do_not_block_later_ones() {
    let queue = ProcessingQueue::new();

    for round in 0..5 {
        let failed = queue
            .enqueue_blocking(move || -> u32 { panic!("round {round}") }, None)
            .await;
        assert!(matches!(failed, Err(QueueError::Panicked(_))));

        let ok = queue.enqueue_blocking(move || round, None).await;
        assert_eq!(ok.unwrap(), round);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_callers_leave_queue_usable() {
    let queue = Arc::new(ProcessingQueue::new());
    let token = CancellationToken::new();

    let slow = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            queue
                .enqueue_blocking(|| std::thread::sleep(Duration::from_millis(200)), None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waiting = {
        let queue = Arc::clone(&queue);
        let token = token.clone();
        tokio::spawn(async move { queue.enqueue_blocking(|| 1, Some(&token)).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert!(matches!(waiting.await.unwrap(), Err(QueueError::Cancelled)));
    slow.await.unwrap().unwrap();
    assert_eq!(queue.enqueue_blocking(|| 2, None).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_running_unit_does_not_interrupt_it() {
    let queue = ProcessingQueue::new();
    let token = CancellationToken::new();
    let finished = Arc::new(AtomicBool::new(false));

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let flag = Arc::clone(&finished);
    let result = queue
        .enqueue_blocking(
            move || {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
            },
            Some(&token),
        )
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(QueueError::Cancelled)));
    // The next unit only runs once the cancelled one has finished.
    queue.enqueue_blocking(|| (), None).await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
}
