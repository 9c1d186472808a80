//! Informer: a locally cached, continuously synchronized view of a remote
//! collection.
//!
//! The [`Informer`] lists the collection once, marks itself synced, then
//! follows the watch feed. Every change lands in the [`Store`] first and is
//! announced as an [`InformerEvent`] afterwards, so a consumer reacting to an
//! event always finds at least that state in the cache.

pub mod client;
pub mod reflector;
pub mod store;

pub use client::{ListParams, ObjectList, ResourceClient, WatchEvent, WatchStream};
pub use reflector::{Informer, InformerEvent, InformerParts, SyncSignal, SyncState};
pub use store::Store;

pub use crate::core::key::Resource;
