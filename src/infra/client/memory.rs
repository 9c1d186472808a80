//! In-memory [`ResourceClient`] with a versioned change history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::key::{key_from_parts, meta_namespace_key, Resource};
use crate::core::ClientError;
use crate::informer::client::{ListParams, ObjectList, ResourceClient, WatchEvent, WatchStream};

const DEFAULT_HISTORY_LIMIT: usize = 1024;

type EventSender<T> = mpsc::UnboundedSender<Result<WatchEvent<T>, ClientError>>;

struct Watcher<T> {
    namespace: Option<String>,
    tx: EventSender<T>,
}

struct Inner<T> {
    objects: BTreeMap<String, T>,
    version: u64,
    /// Versions at or below this can no longer be resumed from.
    compacted: u64,
    history: VecDeque<(u64, WatchEvent<T>)>,
    history_limit: usize,
    watchers: Vec<Watcher<T>>,
    failing_lists: usize,
    failing_watches: usize,
    list_calls: usize,
    watch_calls: usize,
}

impl<T: Resource + Clone> Inner<T> {
    fn record(&mut self, event: WatchEvent<T>) {
        self.history.push_back((self.version, event.clone()));
        while self.history.len() > self.history_limit {
            if let Some((version, _)) = self.history.pop_front() {
                self.compacted = version;
            }
        }
        self.watchers.retain(|watcher| {
            if !matches_namespace(watcher.namespace.as_deref(), event.object()) {
                return !watcher.tx.is_closed();
            }
            watcher.tx.unbounded_send(Ok(event.clone())).is_ok()
        });
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

fn matches_namespace<T: Resource>(namespace: Option<&str>, obj: &T) -> bool {
    namespace.is_none_or(|ns| obj.namespace() == Some(ns))
}

/// Versioned in-memory collection implementing list and watch.
///
/// Every write bumps a global version and is stamped on the stored object.
/// Watches resume from any version still in the bounded history; older
/// versions answer [`ClientError::Gone`]. Clones share the same collection.
pub struct InMemoryClient<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for InMemoryClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Resource + Clone> Default for InMemoryClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource + Clone> InMemoryClient<T> {
    /// Empty collection.
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Empty collection remembering at most `limit` changes for watch
    /// resumption.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                compacted: 0,
                history: VecDeque::new(),
                history_limit: limit.max(1),
                watchers: Vec::new(),
                failing_lists: 0,
                failing_watches: 0,
                list_calls: 0,
                watch_calls: 0,
            })),
        }
    }

    /// Create or replace `obj`. Returns the stored copy with its new version.
    ///
    /// Objects without a usable key are ignored and returned unchanged.
    pub fn apply(&self, mut obj: T) -> T {
        let Ok(key) = meta_namespace_key(&obj) else {
            return obj;
        };
        let mut inner = self.inner.lock();
        obj.set_resource_version(inner.next_version());
        let event = if inner.objects.insert(key, obj.clone()).is_some() {
            WatchEvent::Modified(obj.clone())
        } else {
            WatchEvent::Added(obj.clone())
        };
        inner.record(event);
        obj
    }

    /// Remove the object, returning its final state.
    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Option<T> {
        let key = key_from_parts(namespace, name);
        let mut inner = self.inner.lock();
        let mut obj = inner.objects.remove(&key)?;
        obj.set_resource_version(inner.next_version());
        inner.record(WatchEvent::Deleted(obj.clone()));
        Some(obj)
    }

    /// Stored object for `namespace/name`.
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<T> {
        self.inner
            .lock()
            .objects
            .get(&key_from_parts(namespace, name))
            .cloned()
    }

    /// Latest version handed out.
    pub fn resource_version(&self) -> String {
        self.inner.lock().version.to_string()
    }

    /// Make the next `count` list calls fail with a transport error.
    pub fn fail_next_lists(&self, count: usize) {
        self.inner.lock().failing_lists = count;
    }

    /// Make the next `count` watch calls fail with a transport error.
    pub fn fail_next_watches(&self, count: usize) {
        self.inner.lock().failing_watches = count;
    }

    /// End every open watch stream as if the server closed it.
    pub fn disconnect_watchers(&self) {
        let mut inner = self.inner.lock();
        debug!(watchers = inner.watchers.len(), "disconnecting watchers");
        inner.watchers.clear();
    }

    /// Forget the change history. Open watches receive
    /// [`ClientError::Gone`] and later resumes from older versions fail.
    pub fn expire_history(&self) {
        let mut inner = self.inner.lock();
        inner.compacted = inner.version;
        inner.history.clear();
        let version = inner.version.to_string();
        for watcher in inner.watchers.drain(..) {
            let _ = watcher
                .tx
                .unbounded_send(Err(ClientError::Gone(version.clone())));
        }
    }

    /// Number of list calls served so far, failed ones included.
    pub fn list_calls(&self) -> usize {
        self.inner.lock().list_calls
    }

    /// Number of watch calls served so far, failed ones included.
    pub fn watch_calls(&self) -> usize {
        self.inner.lock().watch_calls
    }

    /// Number of currently open watch streams.
    pub fn watcher_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|watcher| !watcher.tx.is_closed());
        inner.watchers.len()
    }
}

#[async_trait]
impl<T> ResourceClient<T> for InMemoryClient<T>
where
    T: Resource + Clone,
{
    async fn list(&self, params: &ListParams) -> Result<ObjectList<T>, ClientError> {
        let mut inner = self.inner.lock();
        inner.list_calls += 1;
        if inner.failing_lists > 0 {
            inner.failing_lists -= 1;
            return Err(ClientError::Transport("injected list failure".into()));
        }
        let items = inner
            .objects
            .values()
            .filter(|obj| matches_namespace(params.namespace.as_deref(), *obj))
            .cloned()
            .collect();
        Ok(ObjectList {
            items,
            resource_version: inner.version.to_string(),
        })
    }

    async fn watch(
        &self,
        params: &ListParams,
        resource_version: &str,
    ) -> Result<WatchStream<T>, ClientError> {
        let mut inner = self.inner.lock();
        inner.watch_calls += 1;
        if inner.failing_watches > 0 {
            inner.failing_watches -= 1;
            return Err(ClientError::Transport("injected watch failure".into()));
        }
        let from = if resource_version.is_empty() {
            inner.version
        } else {
            resource_version
                .parse::<u64>()
                .map_err(|_| ClientError::Transport(format!("bad resource version {resource_version:?}")))?
        };
        if from < inner.compacted {
            return Err(ClientError::Gone(resource_version.to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        let namespace = params.namespace.clone();
        for (version, event) in &inner.history {
            if *version > from && matches_namespace(namespace.as_deref(), event.object()) {
                let _ = tx.unbounded_send(Ok(event.clone()));
            }
        }
        inner.watchers.push(Watcher { namespace, tx });
        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::client::Object;

    #[tokio::test]
    async fn test_apply_stamps_versions() {
        let client = InMemoryClient::new();
        let first = client.apply(Object::new("default", "a"));
        let second = client.apply(Object::new("default", "a").with_data("k", "v"));
        assert_eq!(first.resource_version.as_deref(), Some("1"));
        assert_eq!(second.resource_version.as_deref(), Some("2"));

        let list = client.list(&ListParams::default()).await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.resource_version, "2");
    }

    #[tokio::test]
    async fn test_list_filters_namespace() {
        let client = InMemoryClient::new();
        client.apply(Object::new("a", "x"));
        client.apply(Object::new("b", "y"));
        client.apply(Object::cluster_scoped("z"));

        let list = client.list(&ListParams::namespaced("a")).await.unwrap();
        assert_eq!(list.items, vec![client.get(Some("a"), "x").unwrap()]);
        assert_eq!(client.list(&ListParams::default()).await.unwrap().items.len(), 3);
    }

    #[tokio::test]
    async fn test_watch_replays_and_follows() {
        let client = InMemoryClient::new();
        client.apply(Object::new("default", "a"));
        let mut stream = client.watch(&ListParams::default(), "0").await.unwrap();
        client.delete(Some("default"), "a");

        let added = stream.next().await.unwrap().unwrap();
        assert!(matches!(added, WatchEvent::Added(ref obj) if obj.name == "a"));
        let deleted = stream.next().await.unwrap().unwrap();
        assert!(matches!(deleted, WatchEvent::Deleted(ref obj) if obj.resource_version.as_deref() == Some("2")));
    }

    #[tokio::test]
    async fn test_expired_history_is_gone() {
        let client = InMemoryClient::with_history_limit(2);
        for name in ["a", "b", "c", "d"] {
            client.apply(Object::new("default", name));
        }
        let err = client.watch(&ListParams::default(), "1").await.err();
        assert_eq!(err, Some(ClientError::Gone("1".into())));
        assert!(client.watch(&ListParams::default(), "3").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = InMemoryClient::<Object>::new();
        client.fail_next_lists(1);
        client.fail_next_watches(1);
        assert!(client.list(&ListParams::default()).await.is_err());
        assert!(client.list(&ListParams::default()).await.is_ok());
        assert!(client.watch(&ListParams::default(), "").await.is_err());
        assert!(client.watch(&ListParams::default(), "").await.is_ok());
        assert_eq!(client.list_calls(), 2);
        assert_eq!(client.watch_calls(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let client = InMemoryClient::<Object>::new();
        let mut stream = client.watch(&ListParams::default(), "").await.unwrap();
        assert_eq!(client.watcher_count(), 1);
        client.disconnect_watchers();
        assert!(stream.next().await.is_none());
    }
}
