//! Fixed pool of dedicated worker threads draining a [`RateLimitingQueue`].
//!
//! Each worker owns an OS thread with its own single-threaded Tokio runtime, so
//! reconcilers may be async without sharing the caller's runtime. One
//! iteration of the loop:
//!
//! 1. exit if the cancellation token fired;
//! 2. take a key, waiting at most the poll interval; exit once the queue is
//!    shut down and drained;
//! 3. look the key up in the informer store (a miss passes `None`);
//! 4. run the reconciler, catching panics;
//! 5. on success forget the key's failure history; on failure requeue it with
//!    backoff until the retry budget is spent, then forget it and escalate.
//!
//! `done` is issued by a drop guard so the key is released on every path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};

use super::escalation::{build_escalation, EscalationKind, EscalationSink};
use super::error::ControllerError;
use super::queue::{GetOutcome, RateLimitingQueue};
use super::reconciler::Reconciler;
use crate::config::ControllerConfig;
use crate::informer::Store;

/// Snapshot of worker pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads started.
    pub worker_count: usize,
    /// Reconciles currently running.
    pub active: u64,
    /// Reconciles that succeeded.
    pub reconciled: u64,
    /// Reconciles that returned an error or panicked.
    pub failed: u64,
    /// Failures that were requeued with backoff.
    pub requeued: u64,
    /// Keys dropped after exhausting their retries.
    pub given_up: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    active: AtomicU64,
    reconciled: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    given_up: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active: self.active.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            given_up: self.given_up.load(Ordering::Relaxed),
        }
    }
}

/// Releases the key in the queue when the iteration ends, even on unwind.
struct DoneGuard<'a> {
    queue: &'a RateLimitingQueue,
    key: &'a str,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

/// Everything a worker thread needs, shared by all workers.
struct WorkerContext<T, R> {
    controller: String,
    queue: Arc<RateLimitingQueue>,
    store: Store<T>,
    reconciler: R,
    escalation: Arc<dyn EscalationSink>,
    max_retries: u32,
    poll_interval: Duration,
    counters: Arc<PoolCounters>,
    cancel: CancellationToken,
}

impl<T, R> WorkerContext<T, R>
where
    T: Send + Sync + 'static,
    R: Reconciler<T>,
{
    fn run(&self, worker_id: usize, rt: &tokio::runtime::Runtime) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker_id, "worker cancelled, exiting");
                break;
            }
            let key = match self.queue.get_timeout(self.poll_interval) {
                GetOutcome::Item(key) => key,
                GetOutcome::Empty => continue,
                GetOutcome::ShutDown => {
                    debug!(worker_id, "queue shut down, exiting");
                    break;
                }
            };
            let _done = DoneGuard {
                queue: &self.queue,
                key: &key,
            };
            self.process(worker_id, rt, &key);
        }
    }

    fn process(&self, worker_id: usize, rt: &tokio::runtime::Runtime, key: &str) {
        let obj = self.store.get(key);
        debug!(worker_id, key = %key, cached = obj.is_some(), "reconciling");

        self.counters.active.fetch_add(1, Ordering::Relaxed);
        let outcome = rt.block_on(
            AssertUnwindSafe(self.reconciler.reconcile(key, obj)).catch_unwind(),
        );
        self.counters.active.fetch_sub(1, Ordering::Relaxed);

        let reason = match outcome {
            Ok(Ok(())) => {
                self.queue.forget(key);
                self.counters.reconciled.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, key = %key, "reconciled");
                return;
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => {
                error!(worker_id, key = %key, "reconciler panicked");
                panic_message(payload.as_ref())
            }
        };
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        let requeues = self.queue.num_requeues(key);
        if requeues < self.max_retries {
            warn!(
                worker_id,
                key = %key,
                attempt = requeues + 1,
                error = %reason,
                "reconcile failed, requeueing"
            );
            self.queue.add_rate_limited(key);
            self.counters.requeued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queue.forget(key);
            self.counters.given_up.fetch_add(1, Ordering::Relaxed);
            self.escalation.escalate(build_escalation(
                self.controller.clone(),
                key,
                EscalationKind::GaveUp {
                    attempts: requeues.saturating_add(1),
                },
                reason,
            ));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| format!("panic: {msg}"))
        .or_else(|| payload.downcast_ref::<String>().map(|msg| format!("panic: {msg}")))
        .unwrap_or_else(|| "panic: reconciler panicked".to_string())
}

/// Supervised group of worker threads.
pub struct WorkerPool {
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    worker_count: usize,
    join_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start `config.workers` threads draining `queue`.
    ///
    /// Workers stop when `cancel` fires or the queue is shut down and drained.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Spawn`] if a thread cannot be started; the
    /// workers already running are cancelled.
    pub fn spawn<T, R>(
        config: &ControllerConfig,
        queue: Arc<RateLimitingQueue>,
        store: Store<T>,
        reconciler: R,
        escalation: Arc<dyn EscalationSink>,
        cancel: CancellationToken,
    ) -> Result<Self, ControllerError>
    where
        T: Send + Sync + 'static,
        R: Reconciler<T>,
    {
        let counters = Arc::new(PoolCounters::default());
        let context = Arc::new(WorkerContext {
            controller: config.name.clone(),
            queue,
            store,
            reconciler,
            escalation,
            max_retries: config.max_retries,
            poll_interval: config.worker_poll_interval(),
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            match spawn_worker(worker_id, &config.name, Arc::clone(&context)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    error!(worker_id, error = %err, "failed to spawn worker thread");
                    cancel.cancel();
                    return Err(ControllerError::Spawn(err));
                }
            }
        }

        info!(worker_count = workers.len(), "worker pool started");
        Ok(Self {
            workers: Mutex::new(workers),
            counters,
            worker_count: config.workers,
            join_timeout: config.shutdown_timeout(),
            cancel,
        })
    }

    /// Current activity counters.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Cancel the workers and wait for them to exit.
    ///
    /// Each worker gets the configured shutdown timeout to finish its current
    /// reconcile; workers still running after that are detached. Calling this
    /// again is a no-op. Blocks the calling thread.
    pub fn shutdown(&self) -> PoolStats {
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return self.stats();
        }
        info!(worker_count = workers.len(), "shutting down worker pool");

        for (worker_id, worker) in workers.into_iter().enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(self.join_timeout) {
                Ok(true) => {
                    debug!(worker_id, "worker joined");
                    let _ = joiner.join();
                }
                Ok(false) => {
                    warn!(worker_id, "worker panicked");
                    let _ = joiner.join();
                }
                Err(_) => warn!(worker_id, "worker did not exit within timeout, detaching"),
            }
        }

        let stats = self.stats();
        info!(
            reconciled = stats.reconciled,
            failed = stats.failed,
            given_up = stats.given_up,
            "worker pool shut down"
        );
        stats
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers are signalled but not joined; `shutdown` is the graceful path.
        self.cancel.cancel();
    }
}

fn spawn_worker<T, R>(
    worker_id: usize,
    name: &str,
    context: Arc<WorkerContext<T, R>>,
) -> std::io::Result<JoinHandle<()>>
where
    T: Send + Sync + 'static,
    R: Reconciler<T>,
{
    let span = Span::current();
    thread::Builder::new()
        .name(format!("{name}-worker-{worker_id}"))
        .spawn(move || {
            let _entered = span.enter();
            debug!(worker_id, "worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    error!(worker_id, error = %err, "failed to create worker runtime");
                    return;
                }
            };

            context.run(worker_id, &rt);
            debug!(worker_id, "worker thread exiting");
        })
}
