//! Deduplicating FIFO of keys with processing/dirty tracking.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::GetOutcome;

#[derive(Debug, Default)]
struct State {
    /// Keys eligible for `get`, in insertion order. Every key here is also in `dirty`.
    queue: VecDeque<String>,
    /// Keys that need processing.
    dirty: HashSet<String>,
    /// Keys currently owned by a worker.
    processing: HashSet<String>,
    shutting_down: bool,
    drain: bool,
}

impl State {
    fn pop(&mut self) -> Option<String> {
        let key = self.queue.pop_front()?;
        self.dirty.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }
}

/// Work queue guaranteeing that a key is never handed to two consumers at once.
///
/// - Adding a key that is already waiting is a no-op.
/// - Adding a key that is being processed marks it dirty; it is queued again
///   as soon as [`WorkQueue::done`] is called for it.
/// - After [`WorkQueue::shut_down`], adds are ignored, waiting keys are still
///   handed out, and `get` returns [`None`] once the queue is empty.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    cond: Condvar,
}

impl WorkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as needing processing.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.cond.notify_one();
    }

    /// Block until a key is available. Returns `None` once the queue has been
    /// shut down and drained.
    pub fn get(&self) -> Option<String> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.shutting_down {
            self.cond.wait(&mut state);
        }
        state.pop()
    }

    /// Like [`WorkQueue::get`], giving up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> GetOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.shutting_down {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::outcome(&mut state)
    }

    /// Take a key without blocking.
    pub fn try_get(&self) -> GetOutcome {
        Self::outcome(&mut self.state.lock())
    }

    fn outcome(state: &mut State) -> GetOutcome {
        match state.pop() {
            Some(key) => GetOutcome::Item(key),
            None if state.shutting_down => GetOutcome::ShutDown,
            None => GetOutcome::Empty,
        }
    }

    /// Release `key` after processing. A key re-added while it was being
    /// processed is queued again here.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        if !state.processing.remove(key) {
            return;
        }
        let requeued = state.dirty.contains(key);
        if requeued {
            state.queue.push_back(key.to_string());
        }
        let drained = state.drain && state.processing.is_empty();
        drop(state);
        if drained {
            self.cond.notify_all();
        } else if requeued {
            self.cond.notify_one();
        }
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is waiting.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Number of keys currently owned by consumers.
    pub fn processing_len(&self) -> usize {
        self.state.lock().processing.len()
    }

    /// Stop accepting keys and wake every blocked `get`. Idempotent.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.cond.notify_all();
    }

    /// Shut down, then block until every in-flight key has been released.
    pub fn shut_down_with_drain(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        state.drain = true;
        self.cond.notify_all();
        while !state.processing.is_empty() {
            self.cond.wait(&mut state);
        }
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_duplicate_adds_collapse() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().as_deref(), Some("a"));
        assert_eq!(q.get().as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_add_while_processing_requeues_on_done() {
        let q = WorkQueue::new();
        q.add("y");
        let key = q.get().unwrap();
        q.add("y");
        q.add("y");
        assert_eq!(q.len(), 0, "in-flight key must not be handed out again");
        assert_eq!(q.try_get(), GetOutcome::Empty);

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().as_deref(), Some("y"));
        q.done("y");
        assert_eq!(q.try_get(), GetOutcome::Empty);
    }

    #[test]
    fn test_done_for_unknown_key_is_ignored() {
        let q = WorkQueue::new();
        q.done("ghost");
        assert!(q.is_empty());
        assert_eq!(q.processing_len(), 0);
    }

    #[test]
    fn test_shutdown_drains_waiting_keys_then_stops() {
        let q = WorkQueue::new();
        q.add("a");
        q.shut_down();
        q.add("b");
        assert_eq!(q.get().as_deref(), Some("a"));
        assert_eq!(q.get(), None);
        assert_eq!(q.try_get(), GetOutcome::ShutDown);
        q.shut_down();
        assert!(q.is_shutting_down());
    }

    #[test]
    fn test_shutdown_wakes_blocked_getters() {
        let q = Arc::new(WorkQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.get())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        q.shut_down();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
    }

    #[test]
    fn test_get_timeout() {
        let q = WorkQueue::new();
        assert_eq!(q.get_timeout(Duration::from_millis(10)), GetOutcome::Empty);
        q.add("k");
        assert_eq!(q.get_timeout(Duration::from_millis(10)), GetOutcome::Item("k".into()));
    }

    #[test]
    fn test_shut_down_with_drain_waits_for_in_flight() {
        let q = Arc::new(WorkQueue::new());
        q.add("slow");
        let key = q.get().unwrap();

        let worker = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                q.done(&key);
            })
        };
        let start = Instant::now();
        q.shut_down_with_drain();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(q.processing_len(), 0);
        worker.join().unwrap();
    }
}
