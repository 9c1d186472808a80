//! Assemble a [`Controller`] from a [`ControllerConfig`] and its collaborators.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ControllerConfig;
use crate::core::escalation::{EscalationSink, TracingEscalationSink};
use crate::core::key::{default_key_fn, KeyFn, Resource};
use crate::core::queue::RateLimitingQueue;
use crate::core::rate_limiter::{self, RateLimiter};
use crate::core::reconciler::Reconciler;
use crate::core::ControllerError;
use crate::informer::{Informer, ResourceClient};
use crate::runtime::Controller;

/// Builder for a [`Controller`].
///
/// The rate limiter defaults to the one described by
/// [`ControllerConfig::rate_limiter`], keys to `namespace/name`, and
/// escalations are logged through [`TracingEscalationSink`].
pub struct ControllerBuilder<T, C, R> {
    config: ControllerConfig,
    client: C,
    reconciler: R,
    key_fn: Option<KeyFn<T>>,
    escalation: Option<Arc<dyn EscalationSink>>,
    rate_limiter: Option<Box<dyn RateLimiter>>,
}

impl<T, C, R> ControllerBuilder<T, C, R>
where
    T: Resource,
    C: ResourceClient<T>,
    R: Reconciler<T>,
{
    /// Start from `config`, watching through `client` and reconciling with
    /// `reconciler`.
    pub fn new(config: ControllerConfig, client: C, reconciler: R) -> Self {
        Self {
            config,
            client,
            reconciler,
            key_fn: None,
            escalation: None,
            rate_limiter: None,
        }
    }

    /// Derive queue keys with `key_fn`.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn<T>) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Send escalations to `sink`.
    #[must_use]
    pub fn with_escalation_sink(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.escalation = Some(sink);
        self
    }

    /// Use `limiter` instead of the configured one.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Box<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Validate the configuration and build the controller.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::Config`] for an invalid configuration.
    /// - [`ControllerError::Spawn`] if the queue's delay thread cannot start.
    pub fn build(self) -> Result<Controller<T, C, R>, ControllerError> {
        self.config.validate()?;

        let limiter = self
            .rate_limiter
            .unwrap_or_else(|| rate_limiter::from_config(&self.config.rate_limiter));
        let queue = RateLimitingQueue::new(&self.config.name, limiter)
            .map_err(ControllerError::Spawn)?;
        let key_fn = self.key_fn.unwrap_or_else(default_key_fn);

        let (informer, parts) =
            Informer::new(self.client, self.config.list_params(), self.config.event_buffer);
        let informer = informer
            .with_resync_period(self.config.resync_period())
            .with_key_fn(Arc::clone(&key_fn))
            .with_watch_backoff(
                Duration::from_millis(self.config.watch_backoff_base_ms),
                Duration::from_millis(self.config.watch_backoff_max_ms),
            );
        let escalation = self
            .escalation
            .unwrap_or_else(|| Arc::new(TracingEscalationSink));

        Ok(Controller::from_parts(
            self.config,
            Arc::new(queue),
            informer,
            parts,
            self.reconciler,
            key_fn,
            escalation,
        ))
    }
}
