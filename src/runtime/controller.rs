//! The controller driver: informer → queue → workers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::core::escalation::{build_escalation, EscalationKind, EscalationSink};
use crate::core::key::{KeyFn, Resource};
use crate::core::queue::RateLimitingQueue;
use crate::core::reconciler::Reconciler;
use crate::core::worker_pool::{PoolStats, WorkerPool};
use crate::core::{ControllerError, InformerError};
use crate::informer::{Informer, InformerEvent, InformerParts, ResourceClient, Store, SyncSignal};

/// Runs one reconcile loop over one watched collection.
///
/// Build it with [`crate::builders::ControllerBuilder`], grab [`queue`] or
/// [`store`] handles if needed, then [`run`] it until the shutdown token
/// fires.
///
/// [`queue`]: Controller::queue
/// [`store`]: Controller::store
/// [`run`]: Controller::run
pub struct Controller<T, C, R> {
    config: ControllerConfig,
    queue: Arc<RateLimitingQueue>,
    informer: Informer<T, C>,
    parts: InformerParts<T>,
    reconciler: R,
    key_fn: KeyFn<T>,
    escalation: Arc<dyn EscalationSink>,
}

impl<T, C, R> std::fmt::Debug for Controller<T, C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.config.name)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T, C, R> Controller<T, C, R>
where
    T: Resource,
    C: ResourceClient<T>,
    R: Reconciler<T>,
{
    pub(crate) fn from_parts(
        config: ControllerConfig,
        queue: Arc<RateLimitingQueue>,
        informer: Informer<T, C>,
        parts: InformerParts<T>,
        reconciler: R,
        key_fn: KeyFn<T>,
        escalation: Arc<dyn EscalationSink>,
    ) -> Self {
        Self {
            config,
            queue,
            informer,
            parts,
            reconciler,
            key_fn,
            escalation,
        }
    }

    /// Configuration the controller was built with.
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handle to the work queue, for enqueueing keys by hand.
    pub fn queue(&self) -> Arc<RateLimitingQueue> {
        Arc::clone(&self.queue)
    }

    /// Read handle to the informer cache.
    pub fn store(&self) -> Store<T> {
        self.parts.store.clone()
    }

    /// Initial sync signal of the informer.
    pub fn synced(&self) -> SyncSignal {
        self.parts.synced.clone()
    }

    /// Run until `shutdown` fires or a supervised task fails.
    ///
    /// Informer events are queued as soon as they arrive, but workers start
    /// only after the cache has synced. On return the queue is shut down, the
    /// workers are joined and the informer is stopped.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::CacheSync`] or [`ControllerError::SyncTimeout`] if
    ///   the initial sync does not complete; no worker is started.
    /// - [`ControllerError::Spawn`] if a worker thread cannot be started.
    /// - [`ControllerError::Informer`] or [`ControllerError::Task`] if the
    ///   informer stops after syncing.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PoolStats, ControllerError> {
        let span = info_span!(
            "controller",
            name = %self.config.name,
            run_id = %Uuid::new_v4()
        );
        self.run_inner(shutdown).instrument(span).await
    }

    async fn run_inner(self, shutdown: CancellationToken) -> Result<PoolStats, ControllerError> {
        let Self {
            config,
            queue,
            informer,
            parts,
            reconciler,
            key_fn,
            escalation,
        } = self;
        let InformerParts {
            store,
            events,
            mut synced,
        } = parts;
        let collection = config.list_params().to_string();
        let cancel = shutdown.child_token();

        info!(workers = config.workers, collection = %collection, "starting controller");
        let mut informer_task = tokio::spawn(informer.run(cancel.clone()).in_current_span());
        // Drained from the start so the initial list never backs up the
        // bounded event channel while the sync is pending.
        let pump_task = tokio::spawn(
            pump_events(events, key_fn, Arc::clone(&queue), cancel.clone()).in_current_span(),
        );

        let sync_timeout = config.cache_sync_timeout();
        let synced_result = tokio::select! {
            () = shutdown.cancelled() => None,
            result = tokio::time::timeout(sync_timeout, synced.wait_for_sync()) => Some(result),
        };
        let sync_error = match synced_result {
            None => {
                info!("shutdown requested before cache sync");
                stop_before_workers(&cancel, &queue, informer_task, pump_task).await;
                return Ok(PoolStats::default());
            }
            Some(Ok(Ok(()))) => None,
            Some(Ok(Err(reason))) => Some(ControllerError::CacheSync {
                resource: collection.clone(),
                reason,
            }),
            Some(Err(_)) => Some(ControllerError::SyncTimeout(sync_timeout)),
        };
        if let Some(err) = sync_error {
            escalation.escalate(build_escalation(
                config.name.clone(),
                collection,
                EscalationKind::CacheSyncFailed,
                err.to_string(),
            ));
            stop_before_workers(&cancel, &queue, informer_task, pump_task).await;
            return Err(err);
        }
        info!(queued = queue.len(), "cache synced, starting workers");

        let pool = match WorkerPool::spawn(
            &config,
            Arc::clone(&queue),
            store,
            reconciler,
            escalation,
            cancel.child_token(),
        ) {
            Ok(pool) => pool,
            Err(err) => {
                stop_before_workers(&cancel, &queue, informer_task, pump_task).await;
                return Err(err);
            }
        };

        let (outcome, informer_finished) = tokio::select! {
            () = shutdown.cancelled() => {
                info!("shutdown requested");
                (Ok(()), false)
            }
            result = &mut informer_task => (informer_outcome(result), true),
        };
        if let Err(err) = &outcome {
            warn!(error = %err, "informer stopped, shutting down controller");
        }

        queue.shut_down();
        cancel.cancel();
        let stats = tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .map_err(|err| ControllerError::Task(format!("worker pool: {err}")))?;
        if !informer_finished {
            log_informer_exit(informer_task.await);
        }
        if let Err(err) = pump_task.await {
            warn!(error = %err, "event pump did not stop cleanly");
        }

        info!(
            reconciled = stats.reconciled,
            given_up = stats.given_up,
            "controller stopped"
        );
        outcome.map(|()| stats)
    }
}

/// Forward informer events into the queue as keys.
async fn pump_events<T: Resource>(
    mut events: mpsc::Receiver<InformerEvent<T>>,
    key_fn: KeyFn<T>,
    queue: Arc<RateLimitingQueue>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match key_fn(event.object().as_ref()) {
            Ok(key) => {
                debug!(key = %key, action = event.action(), "enqueueing");
                queue.add(key);
            }
            Err(err) => warn!(error = %err, action = event.action(), "dropping event without a key"),
        }
    }
    debug!("event pump stopped");
}

/// Tear down the informer and pump when no worker was started.
async fn stop_before_workers(
    cancel: &CancellationToken,
    queue: &RateLimitingQueue,
    informer_task: JoinHandle<Result<(), InformerError>>,
    pump_task: JoinHandle<()>,
) {
    cancel.cancel();
    queue.shut_down();
    log_informer_exit(informer_task.await);
    if let Err(err) = pump_task.await {
        warn!(error = %err, "event pump did not stop cleanly");
    }
}

fn informer_outcome(
    result: Result<Result<(), InformerError>, JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(err) => Err(ControllerError::Task(format!("informer: {err}"))),
    }
}

fn log_informer_exit(result: Result<Result<(), InformerError>, JoinError>) {
    if let Err(err) = informer_outcome(result) {
        debug!(error = %err, "informer exited with error");
    }
}
