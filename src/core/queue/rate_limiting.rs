//! Rate-limited requeueing on top of [`DelayingQueue`].

use std::time::Duration;

use tracing::debug;

use super::{DelayingQueue, GetOutcome};
use crate::core::rate_limiter::{default_controller_rate_limiter, RateLimiter};

/// The queue controllers drain: deduplicating, delay-capable, and aware of
/// per-key failure history.
pub struct RateLimitingQueue {
    queue: DelayingQueue,
    limiter: Box<dyn RateLimiter>,
}

impl std::fmt::Debug for RateLimitingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl RateLimitingQueue {
    /// Create a queue using `limiter` for requeue delays.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised when the delaying thread cannot be spawned.
    pub fn new(name: &str, limiter: Box<dyn RateLimiter>) -> std::io::Result<Self> {
        Ok(Self {
            queue: DelayingQueue::new(name)?,
            limiter,
        })
    }

    /// Create a queue using [`default_controller_rate_limiter`].
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised when the delaying thread cannot be spawned.
    pub fn with_default_limiter(name: &str) -> std::io::Result<Self> {
        Self::new(name, Box::new(default_controller_rate_limiter()))
    }

    /// Mark `key` as needing processing now.
    pub fn add(&self, key: impl Into<String>) {
        self.queue.add(key);
    }

    /// Add `key` after `delay`.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        self.queue.add_after(key, delay);
    }

    /// Requeue `key` after the delay its failure history calls for, recording
    /// one more failure.
    pub fn add_rate_limited(&self, key: &str) {
        if self.queue.is_shutting_down() {
            return;
        }
        let delay = self.limiter.when(key);
        debug!(key = %key, delay_ms = delay.as_millis(), "requeueing with backoff");
        self.queue.add_after(key, delay);
    }

    /// Reset the failure history of `key`. Queue membership is unaffected.
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// See [`super::WorkQueue::get`].
    pub fn get(&self) -> Option<String> {
        self.queue.get()
    }

    /// See [`super::WorkQueue::get_timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> GetOutcome {
        self.queue.get_timeout(timeout)
    }

    /// See [`super::WorkQueue::try_get`].
    pub fn try_get(&self) -> GetOutcome {
        self.queue.try_get()
    }

    /// See [`super::WorkQueue::done`].
    pub fn done(&self, key: &str) {
        self.queue.done(key);
    }

    /// Number of keys eligible for `get`.
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

    /// See [`DelayingQueue::shut_down`].
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// See [`DelayingQueue::shut_down_with_drain`].
    pub fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain();
    }
}
