//! Tracking store for AccessPoint records
//!
//! Each record lives in its own slot: a `tokio::sync::Mutex` serializes every
//! mutation of that record, and an `ArcSwap` holds the last published
//! snapshot so status reads never wait on a running reconcile. Slots are
//! indexed by a `DashMap`; no lock covers the whole store.
//!
//! A record can only be removed once its finalizer has been released, so the
//! store never forgets a record whose access point may still exist.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::ResourceExt;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::crd::{AccessPoint, AccessPointPhase, AccessPointSpec, AccessPointStatus};
use crate::finalizer::{self, ACCESS_POINT_FINALIZER};
use crate::gateway::ObservedAccessPoint;
use crate::status;
use crate::{Error, DEFAULT_NAMESPACE};

/// Namespace and name of a record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    /// Namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl RecordKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an AccessPoint object, using the default namespace if unset
    pub fn of(ap: &AccessPoint) -> Self {
        Self::new(
            ap.namespace().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ap.name_any(),
        )
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A tracked AccessPoint plus engine bookkeeping
#[derive(Clone, Debug)]
pub struct ResourceRecord {
    /// The object: metadata, desired spec and reported status
    pub resource: AccessPoint,
    /// Last state fetched from S3 Control, if the access point exists
    pub observed: Option<ObservedAccessPoint>,
    /// Consecutive failed attempts of the current step
    pub attempts: u32,
    /// When the current creation started
    pub creating_since: Option<Instant>,
}

impl ResourceRecord {
    /// Wrap an object with fresh bookkeeping
    pub fn new(resource: AccessPoint) -> Self {
        Self {
            resource,
            observed: None,
            attempts: 0,
            creating_since: None,
        }
    }

    /// Store key of the record
    pub fn key(&self) -> RecordKey {
        RecordKey::of(&self.resource)
    }

    /// Desired spec
    pub fn spec(&self) -> &AccessPointSpec {
        &self.resource.spec
    }

    /// Current phase
    pub fn phase(&self) -> AccessPointPhase {
        self.resource.phase()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut AccessPointStatus {
        self.resource.status_mut()
    }

    /// Spec generation
    pub fn generation(&self) -> i64 {
        self.resource.metadata.generation.unwrap_or(1)
    }

    /// Whether the record is done and may be dropped from the store
    pub fn is_collectable(&self) -> bool {
        self.phase().is_terminal() && !finalizer::has_finalizer(&self.resource)
    }
}

/// Point-in-time view of a record, served by the status API
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    /// Namespace
    pub namespace: String,
    /// Object name
    pub name: String,
    /// Spec generation
    pub generation: i64,
    /// Whether deletion was requested
    pub deletion_requested: bool,
    /// Finalizers on the record
    pub finalizers: Vec<String>,
    /// Desired spec
    pub spec: AccessPointSpec,
    /// Reported status
    pub status: AccessPointStatus,
}

impl RecordSnapshot {
    fn of(record: &ResourceRecord) -> Self {
        let key = record.key();
        Self {
            namespace: key.namespace,
            name: key.name,
            generation: record.generation(),
            deletion_requested: finalizer::is_deletion_requested(&record.resource),
            finalizers: record.resource.finalizers().to_vec(),
            spec: record.resource.spec.clone(),
            status: record.resource.status.clone().unwrap_or_default(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> AccessPointPhase {
        self.status.phase
    }
}

struct RecordSlot {
    record: Arc<Mutex<ResourceRecord>>,
    snapshot: ArcSwap<RecordSnapshot>,
}

impl RecordSlot {
    fn new(record: ResourceRecord) -> Self {
        let snapshot = ArcSwap::from_pointee(RecordSnapshot::of(&record));
        Self {
            record: Arc::new(Mutex::new(record)),
            snapshot,
        }
    }

    fn publish(&self, record: &ResourceRecord) {
        self.snapshot.store(Arc::new(RecordSnapshot::of(record)));
    }
}

/// Result of [`RecordStore::apply`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new record was created
    Created,
    /// The spec changed and the generation was bumped
    Updated,
    /// The spec was identical
    Unchanged,
}

/// Exclusive access to one record
///
/// Publishes a fresh snapshot when dropped.
pub struct RecordGuard {
    guard: OwnedMutexGuard<ResourceRecord>,
    slot: Arc<RecordSlot>,
}

impl Deref for RecordGuard {
    type Target = ResourceRecord;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for RecordGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.slot.publish(&self.guard);
    }
}

/// Store of all tracked records
#[derive(Default)]
pub struct RecordStore {
    slots: DashMap<RecordKey, Arc<RecordSlot>>,
}

impl RecordStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &RecordKey) -> Result<Arc<RecordSlot>, Error> {
        self.slots
            .get(key)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Insert a new record or update the desired spec of an existing one
    ///
    /// Any status on `resource` is ignored. A changed spec bumps the
    /// generation and moves a record in `Error` back to `Pending`. Records
    /// being deleted reject updates.
    pub async fn apply(&self, mut resource: AccessPoint) -> Result<ApplyOutcome, Error> {
        if resource.metadata.namespace.is_none() {
            resource.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
        }
        let key = RecordKey::of(&resource);

        let slot = match self.slots.entry(key.clone()) {
            Entry::Vacant(entry) => {
                resource.metadata.generation = Some(1);
                resource.metadata.deletion_timestamp = None;
                resource.status = None;
                entry.insert(Arc::new(RecordSlot::new(ResourceRecord::new(resource))));
                debug!(record = %key, "tracking new record");
                return Ok(ApplyOutcome::Created);
            }
            Entry::Occupied(entry) => Arc::clone(entry.get()),
        };

        let mut record = slot.record.lock().await;
        if finalizer::is_deletion_requested(&record.resource) {
            return Err(Error::validation_for(
                key.to_string(),
                "record is being deleted",
            ));
        }
        if record.resource.spec == resource.spec {
            return Ok(ApplyOutcome::Unchanged);
        }

        let generation = record.generation() + 1;
        record.resource.spec = resource.spec;
        record.resource.metadata.generation = Some(generation);
        if record.phase() == AccessPointPhase::Error {
            let reported = record.status_mut();
            reported.phase = AccessPointPhase::Pending;
            status::clear_failure(reported);
            status::observe_phase(reported);
            record.attempts = 0;
            record.creating_since = None;
        }
        slot.publish(&record);
        debug!(record = %key, generation, "desired spec updated");
        Ok(ApplyOutcome::Updated)
    }

    /// Mark a record for deletion
    pub async fn request_delete(&self, key: &RecordKey) -> Result<(), Error> {
        let slot = self.slot(key)?;
        let mut record = slot.record.lock().await;
        finalizer::request_deletion(&mut record.resource);
        slot.publish(&record);
        Ok(())
    }

    /// Take exclusive access to a record, waiting for any holder to finish
    pub async fn checkout(&self, key: &RecordKey) -> Result<RecordGuard, Error> {
        let slot = self.slot(key)?;
        let guard = Arc::clone(&slot.record).lock_owned().await;
        Ok(RecordGuard { guard, slot })
    }

    /// Latest published snapshot of a record
    pub fn snapshot(&self, key: &RecordKey) -> Option<Arc<RecordSnapshot>> {
        self.slots.get(key).map(|s| s.snapshot.load_full())
    }

    /// Snapshots of every record, ordered by key
    pub fn snapshots(&self) -> Vec<Arc<RecordSnapshot>> {
        let mut entries: Vec<(RecordKey, Arc<RecordSnapshot>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot.load_full()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, s)| s).collect()
    }

    /// Keys of every record
    pub fn keys(&self) -> Vec<RecordKey> {
        self.slots.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether a record is tracked
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of tracked records
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no records are tracked
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stop tracking a record
    ///
    /// Refused while the record still carries its finalizer.
    pub async fn remove(&self, key: &RecordKey) -> Result<(), Error> {
        let slot = self.slot(key)?;
        let record = slot.record.lock().await;
        if finalizer::has_finalizer(&record.resource) {
            return Err(Error::FinalizerPresent {
                resource: key.to_string(),
                finalizer: ACCESS_POINT_FINALIZER.to_string(),
            });
        }
        self.slots.remove(key);
        debug!(record = %key, "stopped tracking record");
        Ok(())
    }
}
