//! Operator-facing escalation sinks.
//!
//! Only two conditions reach an operator: a key that exhausted its retries
//! and a cache that never synced. Everything else is retried and logged.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::util::clock::now_ms;

/// Kind of escalated condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationKind {
    /// A key failed `attempts` times and was dropped.
    GaveUp {
        /// Total failed attempts, including the last one.
        attempts: u32,
    },
    /// The informer cache never completed its initial sync.
    CacheSyncFailed,
}

/// Escalation record.
#[derive(Debug, Clone)]
pub struct Escalation {
    /// Controller that raised the escalation.
    pub controller: String,
    /// Affected key, or the watched collection for sync failures.
    pub subject: String,
    /// What happened.
    pub kind: EscalationKind,
    /// Last error message.
    pub reason: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Escalation sink abstraction.
pub trait EscalationSink: Send + Sync {
    /// Record an escalation.
    fn escalate(&self, escalation: Escalation);
}

/// Sink that reports escalations as `error` level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEscalationSink;

impl EscalationSink for TracingEscalationSink {
    fn escalate(&self, escalation: Escalation) {
        match escalation.kind {
            EscalationKind::GaveUp { attempts } => tracing::error!(
                controller = %escalation.controller,
                key = %escalation.subject,
                attempts,
                reason = %escalation.reason,
                "gave up reconciling key"
            ),
            EscalationKind::CacheSyncFailed => tracing::error!(
                controller = %escalation.controller,
                resource = %escalation.subject,
                reason = %escalation.reason,
                "cache failed to sync"
            ),
        }
    }
}

/// In-memory sink with a bounded buffer, for tests and dev.
#[derive(Debug)]
pub struct InMemoryEscalationSink {
    events: Mutex<VecDeque<Escalation>>,
    max_events: usize,
}

impl InMemoryEscalationSink {
    /// Create a sink keeping at most `max_events` records.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored escalations, oldest first.
    pub fn events(&self) -> Vec<Escalation> {
        self.events.lock().iter().cloned().collect()
    }
}

impl EscalationSink for InMemoryEscalationSink {
    fn escalate(&self, escalation: Escalation) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(escalation);
    }
}

/// Helper to build an escalation stamped with the current time.
pub fn build_escalation(
    controller: impl Into<String>,
    subject: impl Into<String>,
    kind: EscalationKind,
    reason: impl Into<String>,
) -> Escalation {
    Escalation {
        controller: controller.into(),
        subject: subject.into(),
        kind,
        reason: reason.into(),
        created_at_ms: now_ms(),
    }
}
