//! Object identity and queue key derivation.
//!
//! Keys are `namespace/name` for namespaced objects and plain `name` for
//! cluster-scoped ones. The same object always maps to the same key, which is
//! what lets the queue collapse duplicate adds and lets workers find the
//! object again in the informer store.

use std::sync::Arc;

use super::error::KeyError;

/// Identity metadata every watched object exposes.
pub trait Resource: Send + Sync + 'static {
    /// Namespace, or `None` for cluster-scoped objects.
    fn namespace(&self) -> Option<&str>;
    /// Object name, unique within its namespace.
    fn name(&self) -> &str;
    /// Opaque version the remote store assigns on every write.
    fn resource_version(&self) -> Option<&str> {
        None
    }
    /// Record the version assigned by the store. Types that do not track
    /// versions ignore it.
    fn set_resource_version(&mut self, _version: String) {}
}

/// Shared key function used by the informer and the driver.
pub type KeyFn<T> = Arc<dyn Fn(&T) -> Result<String, KeyError> + Send + Sync>;

/// Derive the `namespace/name` key of an object.
///
/// # Errors
///
/// Returns [`KeyError::MissingName`] when the object name is empty.
pub fn meta_namespace_key<T: Resource + ?Sized>(obj: &T) -> Result<String, KeyError> {
    let name = obj.name();
    if name.is_empty() {
        return Err(KeyError::MissingName);
    }
    Ok(match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    })
}

/// Build a key directly from its parts.
#[must_use]
pub fn key_from_parts(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Split a key back into `(namespace, name)`.
///
/// # Errors
///
/// Returns [`KeyError::InvalidFormat`] for keys with more than one separator
/// or an empty name.
pub fn split_meta_namespace_key(key: &str) -> Result<(Option<&str>, &str), KeyError> {
    let mut parts = key.split('/');
    let (ns, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => (None, name),
        (Some(ns), Some(name), None) => (Some(ns), name),
        _ => return Err(KeyError::InvalidFormat(key.to_string())),
    };
    if name.is_empty() {
        return Err(KeyError::InvalidFormat(key.to_string()));
    }
    Ok((ns.filter(|ns| !ns.is_empty()), name))
}

/// The default key function as a shareable [`KeyFn`].
#[must_use]
pub fn default_key_fn<T: Resource>() -> KeyFn<T> {
    Arc::new(|obj: &T| meta_namespace_key(obj))
}
