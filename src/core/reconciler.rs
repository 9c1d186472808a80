//! The user-supplied reconcile function.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::AppResult;

/// Converges one object toward its desired state.
///
/// Workers call `reconcile` with the key taken from the queue and the object
/// found in the informer store. `None` means the object is no longer cached,
/// which must be handled as a deletion.
///
/// Implementations must be idempotent: the same key can be reconciled many
/// times, from different worker threads, but never twice at the same time.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_workqueue::core::{AppResult, Reconciler};
///
/// #[derive(Clone)]
/// struct EchoReconciler;
///
/// #[async_trait]
/// impl Reconciler<ConfigMap> for EchoReconciler {
///     async fn reconcile(&self, key: &str, obj: Option<Arc<ConfigMap>>) -> AppResult<()> {
///         match obj {
///             Some(cm) => tracing::info!(key, data = ?cm.data, "reconciling"),
///             None => tracing::info!(key, "object deleted"),
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Reconciler<T>: Send + Sync + Clone + 'static
where
    T: Send + Sync + 'static,
{
    /// Reconcile the object stored under `key`.
    ///
    /// Returning an error requeues the key with backoff until the retry
    /// budget is exhausted.
    async fn reconcile(&self, key: &str, obj: Option<Arc<T>>) -> AppResult<()>;
}

/// Adapter turning an async closure into a [`Reconciler`].
#[derive(Clone)]
pub struct FnReconciler<F> {
    f: F,
}

impl<F> FnReconciler<F> {
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F, Fut> Reconciler<T> for FnReconciler<F>
where
    T: Send + Sync + 'static,
    F: Fn(String, Option<Arc<T>>) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
{
    async fn reconcile(&self, key: &str, obj: Option<Arc<T>>) -> AppResult<()> {
        (self.f)(key.to_string(), obj).await
    }
}
