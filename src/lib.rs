//! # Prometheus Workqueue
//!
//! A reconcile-loop controller core: an informer keeps a local cache of a
//! remote collection in sync, every change is reduced to a key on a
//! deduplicating, rate-limited work queue, and a fixed pool of worker threads
//! drains the queue and reconciles each key.
//!
//! ## Core Guarantees
//!
//! - **One in-flight reconcile per key**: a key handed to a worker is not
//!   handed out again until the worker calls `done`; adds made meanwhile are
//!   collapsed into a single follow-up run.
//! - **Cache before events**: the store reflects a change before the event
//!   announcing it is delivered.
//! - **Bounded retries**: failed keys are requeued with per-key exponential
//!   backoff and given up on (and escalated) after `max_retries` failures.
//! - **Workers wait for the cache**: no reconcile runs before the initial
//!   list has been applied.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prometheus_workqueue::builders::ControllerBuilder;
//! use prometheus_workqueue::config::ControllerConfig;
//! use prometheus_workqueue::core::{AppResult, FnReconciler};
//! use prometheus_workqueue::infra::{InMemoryClient, Object};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = InMemoryClient::<Object>::new();
//! client.apply(Object::new("default", "settings").with_data("mode", "fast"));
//!
//! let reconciler = FnReconciler::new(|key: String, obj: Option<Arc<Object>>| async move {
//!     match obj {
//!         Some(obj) => tracing::info!(%key, data = ?obj.data, "sync"),
//!         None => tracing::info!(%key, "deleted"),
//!     }
//!     AppResult::Ok(())
//! });
//!
//! let controller = ControllerBuilder::new(
//!     ControllerConfig::default().with_worker_count(3),
//!     client.clone(),
//!     reconciler,
//! )
//! .build()?;
//!
//! let shutdown = CancellationToken::new();
//! let stats = controller.run(shutdown.clone()).await?;
//! ```
//!
//! For complete scenarios, see `tests/controller_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct controllers from configuration.
pub mod builders;
/// Controller configuration.
pub mod config;
/// Keys, queues, rate limiters, reconcilers and the worker pool.
pub mod core;
/// Cache synchronizer and its read-only store.
pub mod informer;
/// Resource client backends.
pub mod infra;
/// Controller driver.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use builders::ControllerBuilder;
pub use runtime::Controller;
