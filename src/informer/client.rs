//! The remote collection the informer mirrors.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::core::ClientError;

/// Collection selector passed verbatim to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Namespace to watch; `None` means every namespace.
    pub namespace: Option<String>,
    /// Label selector expression.
    pub label_selector: Option<String>,
    /// Field selector expression.
    pub field_selector: Option<String>,
}

impl ListParams {
    /// Selector matching every object in `namespace`.
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for ListParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "namespace {ns}")?,
            None => f.write_str("all namespaces")?,
        }
        if let Some(labels) = &self.label_selector {
            write!(f, " labels={labels}")?;
        }
        if let Some(fields) = &self.field_selector {
            write!(f, " fields={fields}")?;
        }
        Ok(())
    }
}

/// Result of a full list.
#[derive(Debug, Clone)]
pub struct ObjectList<T> {
    /// Every matching object.
    pub items: Vec<T>,
    /// Version to resume watching from.
    pub resource_version: String,
}

/// One change from the watch feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    /// Object created.
    Added(T),
    /// Object changed.
    Modified(T),
    /// Object removed; carries its final state.
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// The object carried by the event.
    pub const fn object(&self) -> &T {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }
}

/// Stream of watch events. Ends when the server closes the watch.
pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, ClientError>>;

/// List/watch access to a remote collection.
#[async_trait]
pub trait ResourceClient<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// List every object matching `params`.
    async fn list(&self, params: &ListParams) -> Result<ObjectList<T>, ClientError>;

    /// Watch changes after `resource_version`.
    ///
    /// Returns [`ClientError::Gone`] when the version is too old to resume
    /// from; callers must list again.
    async fn watch(
        &self,
        params: &ListParams,
        resource_version: &str,
    ) -> Result<WatchStream<T>, ClientError>;
}
