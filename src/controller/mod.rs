//! AccessPoint controller
//!
//! [`reconcile`] runs one pass of the per-record state machine: observe the
//! access point through the gateway, compare it with the desired spec, act,
//! and report the outcome on the record's status. The [`runner`] schedules
//! passes, keeps at most one pass per record in flight, and applies the
//! requeue each pass asks for.

mod phases;
pub mod runner;

pub use runner::{Controller, ControllerClient, ControllerHandle};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::config::ControllerConfig;
use crate::crd::AccessPointPhase;
use crate::finalizer;
use crate::gateway::{AccessPointGateway, GatewayError};
use crate::status;
use crate::store::ResourceRecord;

/// What the runner should do with a record after a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Run the record again after `duration`
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Do nothing until the desired state changes
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Delay before the next pass, if one is scheduled
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Shared state for reconcile passes
pub struct Context {
    /// S3 Control client
    pub gateway: Arc<dyn AccessPointGateway>,
    /// Engine tunables
    pub config: ControllerConfig,
    /// Cancelled when the controller shuts down
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a context with its own cancellation token
    pub fn new(gateway: Arc<dyn AccessPointGateway>, config: ControllerConfig) -> Self {
        Self {
            gateway,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run a gateway call under the per-call timeout and the shutdown token
    ///
    /// A timeout becomes [`GatewayError::Timeout`]; shutdown abandons the call
    /// with [`GatewayError::Cancelled`].
    pub async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let timeout = self.config.call_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(operation, "gateway call cancelled");
                Err(GatewayError::Cancelled)
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(operation, timeout_ms = timeout.as_millis() as u64, "gateway call timed out");
                    Err(GatewayError::Timeout(timeout))
                }
            },
        }
    }
}

/// Run one reconcile pass for a record
///
/// Never fails: every outcome is reported through the record's phase and
/// conditions, and the returned [`Action`] says when to run again.
#[instrument(
    skip(record, ctx),
    fields(record = %record.key(), access_point = %record.spec().key(), phase = ?record.phase())
)]
pub async fn reconcile(record: &mut ResourceRecord, ctx: &Context) -> Action {
    if finalizer::is_deletion_requested(&record.resource)
        && !matches!(
            record.phase(),
            AccessPointPhase::Deleting | AccessPointPhase::Deleted
        )
    {
        phases::transition(record, AccessPointPhase::Deleting);
    }

    let action = match record.phase() {
        AccessPointPhase::Pending => phases::handle_pending(record, ctx).await,
        AccessPointPhase::Creating => phases::handle_creating(record, ctx).await,
        AccessPointPhase::Synced => phases::handle_synced(record, ctx).await,
        AccessPointPhase::Deleting => phases::handle_deleting(record, ctx).await,
        AccessPointPhase::Error | AccessPointPhase::Deleted => Action::await_change(),
    };

    let generation = record.generation();
    let reported = record.status_mut();
    reported.observed_generation = Some(generation);
    status::observe_phase(reported);
    action
}
