//! Worker runtime for the AccessPoint controller
//!
//! One scheduler task owns the queues. Reconcile passes run on a bounded
//! `JoinSet`; a key is never reconciled concurrently with itself. A trigger
//! that arrives while its key is running marks the key dirty, and the key runs
//! again as soon as the current pass finishes. Requeues wait in a
//! `DelayQueue` with one entry per key, where the earliest deadline wins.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, warn};

use super::{reconcile, Action, Context};
use crate::config::ControllerConfig;
use crate::crd::{AccessPoint, AccessPointPhase};
use crate::gateway::AccessPointGateway;
use crate::retry::wait_for;
use crate::store::{ApplyOutcome, RecordKey, RecordSnapshot, RecordStore};
use crate::Error;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for a running controller
pub struct Controller {
    gateway: Arc<dyn AccessPointGateway>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller for the given gateway
    pub fn new(gateway: Arc<dyn AccessPointGateway>, config: ControllerConfig) -> Self {
        Self { gateway, config }
    }

    /// Spawn the scheduler and return a handle to it
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> ControllerHandle {
        let store = Arc::new(RecordStore::new());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(Context {
            gateway: self.gateway,
            config: self.config,
            cancel: cancel.clone(),
        });
        info!(workers = ctx.config.workers, "starting access point controller");

        let scheduler = Scheduler::new(Arc::clone(&store), ctx);
        let task = tokio::spawn(scheduler.run(rx));

        ControllerHandle {
            client: ControllerClient { store, tx, cancel },
            task,
        }
    }
}

/// Cloneable access to a running controller
#[derive(Clone)]
pub struct ControllerClient {
    store: Arc<RecordStore>,
    tx: mpsc::UnboundedSender<RecordKey>,
    cancel: CancellationToken,
}

impl ControllerClient {
    /// Submit a desired spec and schedule a reconcile if it changed
    pub async fn apply(&self, resource: AccessPoint) -> Result<ApplyOutcome, Error> {
        let key = RecordKey::of(&resource);
        let outcome = self.store.apply(resource).await?;
        if outcome != ApplyOutcome::Unchanged {
            self.trigger(&key);
        }
        Ok(outcome)
    }

    /// Request deletion of a record and schedule a reconcile
    pub async fn request_delete(&self, key: &RecordKey) -> Result<(), Error> {
        self.store.request_delete(key).await?;
        self.trigger(key);
        Ok(())
    }

    /// Schedule an immediate reconcile of a record
    pub fn trigger(&self, key: &RecordKey) {
        if self.tx.send(key.clone()).is_err() {
            debug!(record = %key, "controller stopped, trigger dropped");
        }
    }

    /// Latest snapshot of a record
    pub fn status(&self, key: &RecordKey) -> Option<Arc<RecordSnapshot>> {
        self.store.snapshot(key)
    }

    /// Snapshots of every record, ordered by key
    pub fn list(&self) -> Vec<Arc<RecordSnapshot>> {
        self.store.snapshots()
    }

    /// Whether the controller is still running
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Wait until a record reaches `phase`
    pub async fn wait_for_phase(
        &self,
        key: &RecordKey,
        phase: AccessPointPhase,
        timeout: Duration,
    ) -> Result<Arc<RecordSnapshot>, Error> {
        let what = format!("{key} to reach {phase}");
        wait_for(timeout, WAIT_POLL_INTERVAL, &what, move || async move {
            self.status(key).filter(|s| s.phase() == phase)
        })
        .await
    }

    /// Wait until a record is no longer tracked
    pub async fn wait_for_removal(&self, key: &RecordKey, timeout: Duration) -> Result<(), Error> {
        let what = format!("{key} to be removed");
        wait_for(timeout, WAIT_POLL_INTERVAL, &what, move || async move {
            (!self.store.contains(key)).then_some(())
        })
        .await
    }
}

/// Owner of a running controller
pub struct ControllerHandle {
    client: ControllerClient,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// A cloneable client for this controller
    pub fn client(&self) -> ControllerClient {
        self.client.clone()
    }

    /// Stop scheduling, cancel in-flight gateway calls and wait for running
    /// passes to finish
    pub async fn shutdown(self) {
        info!("shutting down access point controller");
        self.client.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "controller scheduler task failed");
        }
    }
}

impl Deref for ControllerHandle {
    type Target = ControllerClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

enum PassOutcome {
    Requeue(Action),
    Removed,
    Gone,
}

type PassResult = (RecordKey, Result<PassOutcome, Box<dyn Any + Send>>);

struct Scheduler {
    store: Arc<RecordStore>,
    ctx: Arc<Context>,
    delays: DelayQueue<RecordKey>,
    delayed: HashMap<RecordKey, (delay_queue::Key, Instant)>,
    ready: VecDeque<RecordKey>,
    queued: HashSet<RecordKey>,
    running: HashSet<RecordKey>,
    dirty: HashSet<RecordKey>,
    tasks: JoinSet<PassResult>,
}

impl Scheduler {
    fn new(store: Arc<RecordStore>, ctx: Arc<Context>) -> Self {
        Self {
            store,
            ctx,
            delays: DelayQueue::new(),
            delayed: HashMap::new(),
            ready: VecDeque::new(),
            queued: HashSet::new(),
            running: HashSet::new(),
            dirty: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RecordKey>) {
        let mut inbox_open = true;

        loop {
            self.dispatch();

            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.finished(joined);
                }
                message = rx.recv(), if inbox_open => match message {
                    Some(key) => self.enqueue(key),
                    None => inbox_open = false,
                },
                Some(expired) = self.delays.next(), if !self.delays.is_empty() => {
                    let key = expired.into_inner();
                    self.delayed.remove(&key);
                    self.enqueue(key);
                }
            }
        }

        debug!(running = self.tasks.len(), "draining reconcile passes");
        while let Some(joined) = self.tasks.join_next().await {
            self.finished(joined);
        }
        info!("access point controller stopped");
    }

    /// Start queued keys while worker slots are free
    fn dispatch(&mut self) {
        while self.tasks.len() < self.ctx.config.workers {
            let Some(key) = self.ready.pop_front() else {
                break;
            };
            self.queued.remove(&key);
            self.running.insert(key.clone());

            let store = Arc::clone(&self.store);
            let ctx = Arc::clone(&self.ctx);
            self.tasks.spawn(async move {
                let outcome = AssertUnwindSafe(run_pass(&store, &ctx, &key))
                    .catch_unwind()
                    .await;
                (key, outcome)
            });
        }
    }

    /// Queue a key to run as soon as a worker is free
    fn enqueue(&mut self, key: RecordKey) {
        if self.running.contains(&key) {
            self.dirty.insert(key);
            return;
        }
        if let Some((delay_key, _)) = self.delayed.remove(&key) {
            self.delays.remove(&delay_key);
        }
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Run a key after `delay`, unless it is already due sooner
    fn schedule(&mut self, key: RecordKey, delay: Duration) {
        if delay.is_zero() {
            self.enqueue(key);
            return;
        }
        if self.queued.contains(&key) {
            return;
        }
        let deadline = Instant::now() + delay;
        match self.delayed.get_mut(&key) {
            Some((_, due)) if *due <= deadline => {}
            Some((delay_key, due)) => {
                self.delays.reset_at(delay_key, deadline);
                *due = deadline;
            }
            None => {
                let delay_key = self.delays.insert_at(key.clone(), deadline);
                self.delayed.insert(key, (delay_key, deadline));
            }
        }
    }

    fn finished(&mut self, joined: Result<PassResult, JoinError>) {
        let (key, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "reconcile task failed to join");
                return;
            }
        };
        self.running.remove(&key);
        let dirty = self.dirty.remove(&key);

        match outcome {
            Ok(PassOutcome::Requeue(action)) => {
                if dirty {
                    self.enqueue(key);
                } else if let Some(delay) = action.requeue_after() {
                    self.schedule(key, delay);
                }
            }
            Ok(PassOutcome::Removed) | Ok(PassOutcome::Gone) => {}
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(record = %key, panic = %message, "reconcile pass panicked");
                self.schedule(key, self.ctx.config.backoff.max_delay);
            }
        }
    }
}

/// One reconcile pass, followed by garbage collection of finished records
async fn run_pass(store: &RecordStore, ctx: &Context, key: &RecordKey) -> PassOutcome {
    let mut record = match store.checkout(key).await {
        Ok(record) => record,
        Err(_) => return PassOutcome::Gone,
    };
    let action = reconcile(&mut record, ctx).await;
    let collectable = record.is_collectable();
    drop(record);

    if collectable {
        match store.remove(key).await {
            Ok(()) => {
                info!(record = %key, "record deleted and removed");
                return PassOutcome::Removed;
            }
            Err(e) => warn!(record = %key, error = %e, "record not removed"),
        }
    }
    PassOutcome::Requeue(action)
}
