//! Integration tests for the work queue layers
//!
//! These tests validate the queue contract workers rely on:
//! - Deduplication and collapse of adds made while a key is processing
//! - No key handed to two consumers at once, under random interleavings
//! - Rate-limited requeues, `forget` and `num_requeues`
//! - Shutdown waking every parked consumer

use prometheus_workqueue::core::{
    GetOutcome, ItemExponentialFailureRateLimiter, RateLimiter, RateLimitingQueue, WorkQueue,
};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn exponential_queue(base: Duration, max: Duration) -> RateLimitingQueue {
    RateLimitingQueue::new(
        "workqueue-test",
        Box::new(ItemExponentialFailureRateLimiter::new(base, max)),
    )
    .unwrap()
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

#[test]
fn test_adds_before_get_collapse() {
    let queue = WorkQueue::new();
    queue.add("a");
    queue.add("a");
    queue.add("b");
    queue.add("a");

    assert_eq!(queue.len(), 2);
    assert_eq!(queue.get().as_deref(), Some("a"));
    assert_eq!(queue.get().as_deref(), Some("b"));
    assert_eq!(queue.try_get(), GetOutcome::Empty);
}

#[test]
fn test_add_during_processing_requeues_once_after_done() {
    let queue = WorkQueue::new();
    queue.add("y");
    let key = queue.get().unwrap();

    queue.add("y");
    queue.add("y");
    assert_eq!(queue.len(), 0, "a processing key must not be handed out again");
    assert_eq!(queue.try_get(), GetOutcome::Empty);

    queue.done(&key);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().as_deref(), Some("y"));
    queue.done("y");
    assert_eq!(queue.try_get(), GetOutcome::Empty);
    assert_eq!(queue.processing_len(), 0);
}

#[test]
fn test_fifo_among_immediate_keys() {
    let queue = WorkQueue::new();
    for key in ["c", "a", "b"] {
        queue.add(key);
    }
    let order: Vec<_> = (0..3).filter_map(|_| queue.get()).collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[test]
fn test_delayed_key_lands_behind_later_adds() {
    let queue = exponential_queue(Duration::from_millis(200), Duration::from_secs(1));
    queue.add_rate_limited("late");
    queue.add("early");

    assert_eq!(queue.get().as_deref(), Some("early"));
    queue.done("early");
    queue.add("early-2");
    assert_eq!(queue.get().as_deref(), Some("early-2"));
    queue.done("early-2");

    assert_eq!(
        queue.get_timeout(Duration::from_secs(2)),
        GetOutcome::Item("late".into())
    );
    queue.shut_down();
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_gets_never_share_a_key() {
    let queue = Arc::new(WorkQueue::new());
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let processed = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let in_flight = Arc::clone(&in_flight);
            let processed = Arc::clone(&processed);
            thread::spawn(move || {
                let mut rng = rand::rng();
                while let Some(key) = queue.get() {
                    assert!(
                        in_flight.lock().unwrap().insert(key.clone()),
                        "key {key} handed to two workers"
                    );
                    thread::sleep(Duration::from_micros(rng.random_range(0..300)));
                    in_flight.lock().unwrap().remove(&key);
                    processed.fetch_add(1, Ordering::SeqCst);
                    queue.done(&key);
                }
            })
        })
        .collect();

    let mut rng = rand::rng();
    for _ in 0..2_000 {
        queue.add(format!("key-{}", rng.random_range(0..20)));
        if rng.random_bool(0.1) {
            thread::sleep(Duration::from_micros(50));
        }
    }
    queue.shut_down_with_drain();

    for worker in workers {
        worker.join().unwrap();
    }
    assert!(processed.load(Ordering::SeqCst) >= 20);
    assert!(in_flight.lock().unwrap().is_empty());
    assert_eq!(queue.processing_len(), 0);
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[test]
fn test_forget_restores_base_delay() {
    let base = Duration::from_millis(5);
    let limiter = ItemExponentialFailureRateLimiter::new(base, Duration::from_secs(10));
    for _ in 0..4 {
        let _ = limiter.when("k");
    }
    assert!(limiter.when("k") > base);

    limiter.forget("k");
    assert_eq!(limiter.when("k"), base);
}

#[test]
fn test_num_requeues_counts_each_rate_limited_add() {
    let queue = exponential_queue(Duration::from_millis(1), Duration::from_millis(5));
    for expected in 1..=3 {
        queue.add_rate_limited("k");
        assert_eq!(queue.num_requeues("k"), expected);
    }
    assert_eq!(queue.num_requeues("other"), 0);

    queue.forget("k");
    assert_eq!(queue.num_requeues("k"), 0);
    queue.shut_down();
}

#[test]
fn test_forget_then_requeue_waits_base_delay_only() {
    let queue = exponential_queue(Duration::from_millis(20), Duration::from_secs(5));
    for _ in 0..6 {
        queue.add_rate_limited("k");
    }
    assert_eq!(
        queue.get_timeout(Duration::from_secs(2)),
        GetOutcome::Item("k".into())
    );
    queue.done("k");

    // Without the reset the next delay would be 20ms * 2^6.
    queue.forget("k");
    let start = Instant::now();
    queue.add_rate_limited("k");
    assert_eq!(
        queue.get_timeout(Duration::from_secs(2)),
        GetOutcome::Item("k".into())
    );
    assert!(start.elapsed() < Duration::from_millis(500));
    queue.shut_down();
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_wakes_every_parked_get() {
    let queue = Arc::new(WorkQueue::new());
    let getters: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get())
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.shut_down();
    queue.shut_down();

    for getter in getters {
        assert_eq!(getter.join().unwrap(), None);
    }
    queue.add("late");
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.get(), None);
    assert!(queue.is_shutting_down());
}

#[test]
fn test_shutdown_drains_waiting_keys_first() {
    let queue = WorkQueue::new();
    queue.add("a");
    queue.add("b");
    queue.shut_down();

    assert_eq!(queue.get().as_deref(), Some("a"));
    assert_eq!(queue.get().as_deref(), Some("b"));
    assert_eq!(queue.get(), None);
    assert_eq!(queue.get_timeout(Duration::from_millis(10)), GetOutcome::ShutDown);
}

#[test]
fn test_shutdown_discards_delayed_keys() {
    let queue = exponential_queue(Duration::from_millis(50), Duration::from_secs(1));
    queue.add_rate_limited("pending");
    queue.shut_down();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(queue.get(), None);
}
