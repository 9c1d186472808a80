//! Work queues for reconcile keys.
//!
//! Three layers, each wrapping the previous one:
//!
//! - [`WorkQueue`]: deduplicating FIFO; a key is never handed to two
//!   consumers at once.
//! - [`DelayingQueue`]: adds `add_after`, backed by a waiting thread.
//! - [`RateLimitingQueue`]: adds per-key failure tracking and backoff.

pub mod delaying;
pub mod rate_limiting;
pub mod work_queue;

pub use delaying::{DelayingQueue, MAX_DELAY};
pub use rate_limiting::RateLimitingQueue;
pub use work_queue::WorkQueue;

/// Result of a non-blocking or bounded `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
    /// A key is now owned by the caller and must be released with `done`.
    Item(String),
    /// Nothing was available in time.
    Empty,
    /// The queue is shut down and drained.
    ShutDown,
}

impl GetOutcome {
    /// The key, if one was taken.
    #[must_use]
    pub fn into_item(self) -> Option<String> {
        match self {
            Self::Item(key) => Some(key),
            Self::Empty | Self::ShutDown => None,
        }
    }
}
