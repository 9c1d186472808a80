//! Error types for the controller core.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while deriving or splitting object keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The object has an empty name.
    #[error("object has no name")]
    MissingName,
    /// The key has more than one `/` separator.
    #[error("unexpected key format: {0:?}")]
    InvalidFormat(String),
}

/// Errors surfaced by a [`ResourceClient`](crate::informer::ResourceClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The requested resource version is too old; a fresh list is required.
    #[error("resource version {0} is gone")]
    Gone(String),
    /// Transport or server failure; the caller may retry.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors produced by the informer actor.
#[derive(Debug, Error)]
pub enum InformerError {
    /// The initial list never completed.
    #[error("initial list failed: {0}")]
    InitialList(#[source] ClientError),
    /// Every event receiver has been dropped.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Errors produced by the controller driver.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The cache never reported a completed initial sync.
    #[error("failed to sync cache for {resource}: {reason}")]
    CacheSync {
        /// Name of the watched collection.
        resource: String,
        /// Why the sync did not complete.
        reason: String,
    },
    /// The cache did not sync within the configured timeout.
    #[error("timed out after {0:?} waiting for cache sync")]
    SyncTimeout(Duration),
    /// The informer failed after the cache had synced.
    #[error(transparent)]
    Informer(#[from] InformerError),
    /// A worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    /// A supervised task terminated abnormally.
    #[error("supervised task failed: {0}")]
    Task(String),
    /// The controller configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Human readable reason.
        reason: String,
    },
    /// The configuration could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Application-facing result using anyhow for reconcile logic.
pub type AppResult<T> = Result<T, anyhow::Error>;
