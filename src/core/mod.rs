//! Core reconcile-loop abstractions: keys, queues, rate limiting and workers.

pub mod error;
pub mod escalation;
pub mod key;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod worker_pool;

pub use error::{AppResult, ClientError, ConfigError, ControllerError, InformerError, KeyError};
pub use escalation::{
    build_escalation, Escalation, EscalationKind, EscalationSink, InMemoryEscalationSink,
    TracingEscalationSink,
};
pub use key::{
    default_key_fn, key_from_parts, meta_namespace_key, split_meta_namespace_key, KeyFn, Resource,
};
pub use queue::{DelayingQueue, GetOutcome, RateLimitingQueue, WorkQueue};
pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    ItemFastSlowRateLimiter, MaxOfRateLimiter, RateLimiter,
};
pub use reconciler::{FnReconciler, Reconciler};
pub use worker_pool::{PoolStats, WorkerPool};
