//! Delayed re-entry of keys into a [`WorkQueue`].
//!
//! Pending keys live on a dedicated thread that sleeps until the earliest
//! deadline. Callers hand keys over through a channel and never block.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{GetOutcome, WorkQueue};

/// Upper bound on how long the waiting thread sleeps without checking for shutdown.
const MAX_WAIT: Duration = Duration::from_secs(10);

/// Longest delay honored by [`DelayingQueue::add_after`]; longer delays are clamped.
pub const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug)]
struct Waiting {
    key: String,
    ready_at: Instant,
}

/// A [`WorkQueue`] that can also add keys after a delay.
#[derive(Debug)]
pub struct DelayingQueue {
    queue: Arc<WorkQueue>,
    waiting_tx: Mutex<Option<Sender<Waiting>>>,
    waiting_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DelayingQueue {
    /// Create a queue and start its waiting thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised when the thread cannot be spawned.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let queue = Arc::new(WorkQueue::new());
        let (waiting_tx, waiting_rx) = unbounded();
        let handle = {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("{name}-delay"))
                .spawn(move || waiting_loop(&queue, &waiting_rx))?
        };
        Ok(Self {
            queue,
            waiting_tx: Mutex::new(Some(waiting_tx)),
            waiting_loop: Mutex::new(Some(handle)),
        })
    }

    /// Mark `key` as needing processing now.
    pub fn add(&self, key: impl Into<String>) {
        self.queue.add(key);
    }

    /// Add `key` once `delay` has elapsed. If the key is already waiting, the
    /// earlier deadline wins. Delays above [`MAX_DELAY`] are clamped.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        let key = key.into();
        if delay.is_zero() {
            self.queue.add(key);
            return;
        }
        let waiting = Waiting {
            key,
            ready_at: Instant::now() + delay.min(MAX_DELAY),
        };
        if let Some(tx) = self.waiting_tx.lock().as_ref() {
            // A closed channel means we are shutting down; dropping the key is fine.
            let _ = tx.send(waiting);
        }
    }

    /// See [`WorkQueue::get`].
    pub fn get(&self) -> Option<String> {
        self.queue.get()
    }

    /// See [`WorkQueue::get_timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> GetOutcome {
        self.queue.get_timeout(timeout)
    }

    /// See [`WorkQueue::try_get`].
    pub fn try_get(&self) -> GetOutcome {
        self.queue.try_get()
    }

    /// See [`WorkQueue::done`].
    pub fn done(&self, key: &str) {
        self.queue.done(key);
    }

    /// Number of keys eligible for `get`. Delayed keys are not counted.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no key is eligible for `get`.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of keys currently being processed.
    pub fn processing_len(&self) -> usize {
        self.queue.processing_len()
    }

    /// Whether the queue has been shut down.
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// Shut the queue down and stop the waiting thread. Pending delayed keys
    /// are discarded. Idempotent.
    pub fn shut_down(&self) {
        self.queue.shut_down();
        self.stop_waiting_loop();
    }

    /// Shut down, then block until every in-flight key has been released.
    pub fn shut_down_with_drain(&self) {
        self.stop_waiting_loop();
        self.queue.shut_down_with_drain();
    }

    fn stop_waiting_loop(&self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.waiting_tx.lock().take();
        if let Some(handle) = self.waiting_loop.lock().take() {
            if handle.join().is_err() {
                warn!("delaying queue thread panicked");
            }
        }
    }
}

/// Pending keys ordered by deadline. Entries whose deadline no longer matches
/// `ready_at` were superseded by an earlier one and are skipped.
#[derive(Default)]
struct Pending {
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    ready_at: HashMap<String, Instant>,
    seq: u64,
}

impl Pending {
    fn insert(&mut self, waiting: Waiting) {
        match self.ready_at.get(&waiting.key) {
            Some(existing) if *existing <= waiting.ready_at => return,
            _ => {}
        }
        self.seq = self.seq.wrapping_add(1);
        self.ready_at.insert(waiting.key.clone(), waiting.ready_at);
        self.heap.push(Reverse((waiting.ready_at, self.seq, waiting.key)));
    }

    fn pop_ready(&mut self, now: Instant) -> Option<String> {
        loop {
            let Reverse((ready_at, _, _)) = self.heap.peek()?;
            if *ready_at > now {
                return None;
            }
            let Reverse((ready_at, _, key)) = self.heap.pop()?;
            if self.ready_at.get(&key) == Some(&ready_at) {
                self.ready_at.remove(&key);
                return Some(key);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((ready_at, _, _))| *ready_at)
    }
}

fn waiting_loop(queue: &WorkQueue, rx: &Receiver<Waiting>) {
    let mut pending = Pending::default();
    loop {
        if queue.is_shutting_down() {
            break;
        }

        let now = Instant::now();
        while let Some(key) = pending.pop_ready(now) {
            queue.add(key);
        }

        let wait = pending
            .next_deadline()
            .map_or(MAX_WAIT, |deadline| deadline.saturating_duration_since(now).min(MAX_WAIT));

        match rx.recv_timeout(wait) {
            Ok(first) => {
                for waiting in std::iter::once(first).chain(rx.try_iter()) {
                    if waiting.ready_at <= Instant::now() {
                        queue.add(waiting.key);
                    } else {
                        pending.insert(waiting);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(pending = pending.ready_at.len(), "delaying queue thread exiting");
}
