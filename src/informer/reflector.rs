//! List/watch loop keeping a [`Store`] in sync with the remote collection.
//!
//! The [`Informer`] is a single-writer actor: it owns the store writer, applies
//! every change before announcing it, and publishes [`InformerEvent`]s on a
//! bounded channel so slow consumers apply backpressure instead of piling up
//! memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ListParams, ObjectList, ResourceClient, WatchEvent};
use super::store::{Store, StoreWriter};
use crate::core::key::{default_key_fn, KeyFn, Resource};
use crate::core::rate_limiter::{ItemExponentialFailureRateLimiter, RateLimiter};
use crate::core::{ClientError, InformerError};

const WATCH_BACKOFF_KEY: &str = "watch";

/// Lifecycle change observed by the informer. The store already reflects the
/// change by the time the event is received.
#[derive(Debug, Clone)]
pub enum InformerEvent<T> {
    /// The object appeared.
    Added(Arc<T>),
    /// The object changed, or a resync re-delivered it (`old` and `new` are
    /// then the same object).
    Updated {
        /// Previously cached state.
        old: Arc<T>,
        /// Current state.
        new: Arc<T>,
    },
    /// The object is gone; carries its final known state.
    Deleted(Arc<T>),
}

impl<T> InformerEvent<T> {
    /// Most recent state carried by the event.
    pub const fn object(&self) -> &Arc<T> {
        match self {
            Self::Added(obj) | Self::Deleted(obj) | Self::Updated { new: obj, .. } => obj,
        }
    }

    /// Short action name for logs.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADD",
            Self::Updated { .. } => "UPDATE",
            Self::Deleted(_) => "DELETE",
        }
    }
}

/// Progress of the initial list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// The initial list has not completed yet.
    Pending,
    /// The store holds the full initial list.
    Synced,
    /// The initial list failed; the informer has stopped.
    Failed(String),
}

/// Observes whether an informer has completed its initial sync.
#[derive(Debug, Clone)]
pub struct SyncSignal {
    rx: watch::Receiver<SyncState>,
}

impl SyncSignal {
    /// Whether the initial list has been applied to the store.
    pub fn has_synced(&self) -> bool {
        matches!(*self.rx.borrow(), SyncState::Synced)
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        self.rx.borrow().clone()
    }

    /// Wait until the initial sync completes or fails.
    ///
    /// # Errors
    ///
    /// Returns the failure reason when the initial list failed or the
    /// informer stopped before syncing.
    pub async fn wait_for_sync(&mut self) -> Result<(), String> {
        let state = self
            .rx
            .wait_for(|state| *state != SyncState::Pending)
            .await
            .map_err(|_| "informer stopped before syncing".to_string())?;
        match &*state {
            SyncState::Synced => Ok(()),
            SyncState::Failed(reason) => Err(reason.clone()),
            SyncState::Pending => Err("informer stopped before syncing".to_string()),
        }
    }
}

/// Read side of an informer, handed out by [`Informer::new`].
#[derive(Debug)]
pub struct InformerParts<T> {
    /// Read-only cache.
    pub store: Store<T>,
    /// Lifecycle events, in the order they were applied to the store.
    pub events: mpsc::Receiver<InformerEvent<T>>,
    /// Initial sync signal.
    pub synced: SyncSignal,
}

/// Mirrors a remote collection into a [`Store`] and emits lifecycle events.
pub struct Informer<T, C> {
    client: C,
    params: ListParams,
    key_fn: KeyFn<T>,
    resync_period: Option<Duration>,
    backoff: ItemExponentialFailureRateLimiter,
    writer: StoreWriter<T>,
    events: mpsc::Sender<InformerEvent<T>>,
    sync_tx: watch::Sender<SyncState>,
    resource_version: String,
}

impl<T, C> Informer<T, C>
where
    T: Resource,
    C: ResourceClient<T>,
{
    /// Create an informer for the collection selected by `params`.
    ///
    /// `buffer` bounds the event channel.
    pub fn new(client: C, params: ListParams, buffer: usize) -> (Self, InformerParts<T>) {
        let writer = StoreWriter::new();
        let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
        let (sync_tx, sync_rx) = watch::channel(SyncState::Pending);
        let parts = InformerParts {
            store: writer.as_reader(),
            events: events_rx,
            synced: SyncSignal { rx: sync_rx },
        };
        let informer = Self {
            client,
            params,
            key_fn: default_key_fn(),
            resync_period: None,
            backoff: ItemExponentialFailureRateLimiter::new(
                Duration::from_millis(800),
                Duration::from_secs(30),
            ),
            writer,
            events: events_tx,
            sync_tx,
            resource_version: String::new(),
        };
        (informer, parts)
    }

    /// Re-deliver every cached object as an update once per `period`.
    #[must_use]
    pub const fn with_resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period;
        self
    }

    /// Use `key_fn` instead of `namespace/name` keys.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn<T>) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Bounds for the reconnect backoff after watch failures.
    #[must_use]
    pub fn with_watch_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = ItemExponentialFailureRateLimiter::new(base, max);
        self
    }

    /// Another read handle to the cache.
    pub fn store(&self) -> Store<T> {
        self.writer.as_reader()
    }

    /// Run until `cancel` fires.
    ///
    /// Cancellation is observed while listing, watching, backing off and
    /// while blocked on a full event channel.
    ///
    /// # Errors
    ///
    /// - [`InformerError::InitialList`] if the initial list fails; the sync
    ///   signal reports the failure and no event is emitted.
    /// - [`InformerError::ChannelClosed`] if the event receiver is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), InformerError> {
        match self.list_and_watch(&cancel).await {
            Ok(()) | Err(Stop::Cancelled) => {
                debug!("informer stopped");
                Ok(())
            }
            Err(Stop::Failed(err)) => Err(err),
        }
    }

    async fn list_and_watch(&mut self, cancel: &CancellationToken) -> Result<(), Stop> {
        let initial = tokio::select! {
            () = cancel.cancelled() => return Err(Stop::Cancelled),
            result = self.client.list(&self.params) => result,
        };
        let list = match initial {
            Ok(list) => list,
            Err(err) => {
                warn!(error = %err, "initial list failed");
                self.sync_tx.send_replace(SyncState::Failed(err.to_string()));
                return Err(InformerError::InitialList(err).into());
            }
        };
        self.replace(list, cancel).await?;
        self.sync_tx.send_replace(SyncState::Synced);
        info!(
            objects = self.writer.snapshot().len(),
            resource_version = %self.resource_version,
            "informer cache synced"
        );

        let mut resync = self.resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let watch = tokio::select! {
                () = cancel.cancelled() => return Err(Stop::Cancelled),
                result = self.client.watch(&self.params, &self.resource_version) => result,
            };
            let failure = match watch {
                Ok(mut stream) => loop {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(Stop::Cancelled),
                        () = tick(&mut resync) => self.resync(cancel).await?,
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                self.backoff.forget(WATCH_BACKOFF_KEY);
                                self.apply(event, cancel).await?;
                            }
                            Some(Err(err)) => break Some(err),
                            None => break None,
                        },
                    }
                },
                Err(err) => Some(err),
            };

            match failure {
                Some(ClientError::Gone(version)) => {
                    info!(resource_version = %version, "watch expired, relisting");
                    self.relist(cancel).await?;
                    continue;
                }
                Some(err) => warn!(error = %err, "watch failed"),
                None => debug!("watch closed by server"),
            }

            let delay = self.backoff.when(WATCH_BACKOFF_KEY);
            debug!(delay_ms = delay.as_millis(), "reconnecting watch");
            tokio::select! {
                () = cancel.cancelled() => return Err(Stop::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// List again until it succeeds.
    async fn relist(&mut self, cancel: &CancellationToken) -> Result<(), Stop> {
        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(Stop::Cancelled),
                result = self.client.list(&self.params) => result,
            };
            match result {
                Ok(list) => {
                    self.backoff.forget(WATCH_BACKOFF_KEY);
                    return self.replace(list, cancel).await;
                }
                Err(err) => {
                    let delay = self.backoff.when(WATCH_BACKOFF_KEY);
                    warn!(error = %err, delay_ms = delay.as_millis(), "relist failed");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(Stop::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Swap the store for a fresh list and announce the difference.
    async fn replace(
        &mut self,
        list: ObjectList<T>,
        cancel: &CancellationToken,
    ) -> Result<(), Stop> {
        let mut ordered = Vec::with_capacity(list.items.len());
        let mut objects = HashMap::with_capacity(list.items.len());
        for obj in list.items {
            let Some(key) = self.key_of(&obj) else {
                continue;
            };
            let obj = Arc::new(obj);
            objects.insert(key.clone(), Arc::clone(&obj));
            ordered.push((key, obj));
        }
        self.resource_version = list.resource_version;

        let mut previous = self.writer.replace(objects);
        for (key, new) in ordered {
            let event = match previous.remove(&key) {
                Some(old) => InformerEvent::Updated { old, new },
                None => InformerEvent::Added(new),
            };
            self.emit(event, cancel).await?;
        }

        let mut vanished: Vec<_> = previous.into_iter().collect();
        vanished.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        for (_, old) in vanished {
            self.emit(InformerEvent::Deleted(old), cancel).await?;
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        event: WatchEvent<T>,
        cancel: &CancellationToken,
    ) -> Result<(), Stop> {
        if let Some(version) = event.object().resource_version() {
            self.resource_version = version.to_string();
        }
        let Some(key) = self.key_of(event.object()) else {
            return Ok(());
        };
        let event = match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let new = Arc::new(obj);
                match self.writer.insert(key, Arc::clone(&new)) {
                    Some(old) => InformerEvent::Updated { old, new },
                    None => InformerEvent::Added(new),
                }
            }
            WatchEvent::Deleted(obj) => {
                self.writer.remove(&key);
                InformerEvent::Deleted(Arc::new(obj))
            }
        };
        self.emit(event, cancel).await
    }

    async fn resync(&mut self, cancel: &CancellationToken) -> Result<(), Stop> {
        let snapshot = self.writer.snapshot();
        debug!(objects = snapshot.len(), "resyncing cache");
        for (_, obj) in snapshot {
            self.emit(
                InformerEvent::Updated {
                    old: Arc::clone(&obj),
                    new: obj,
                },
                cancel,
            )
            .await?;
        }
        Ok(())
    }

    fn key_of(&self, obj: &T) -> Option<String> {
        match (self.key_fn)(obj) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(error = %err, "skipping object without a usable key");
                None
            }
        }
    }

    /// Send one event, giving up if `cancel` fires while the channel is full.
    async fn emit(&self, event: InformerEvent<T>, cancel: &CancellationToken) -> Result<(), Stop> {
        tokio::select! {
            () = cancel.cancelled() => Err(Stop::Cancelled),
            sent = self.events.send(event) => {
                sent.map_err(|_| Stop::Failed(InformerError::ChannelClosed))
            }
        }
    }
}

/// Why the list/watch loop ended early.
enum Stop {
    Cancelled,
    Failed(InformerError),
}

impl From<InformerError> for Stop {
    fn from(err: InformerError) -> Self {
        Self::Failed(err)
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
