//! Infrastructure adapters for the remote collection.

pub mod client;

pub use client::{InMemoryClient, Object};
