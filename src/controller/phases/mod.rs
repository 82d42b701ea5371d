//! Phase handlers for the AccessPoint controller.
//!
//! Each phase of the access point lifecycle is handled by a dedicated module.
//! Handlers mutate the record in place and return the next [`Action`].

mod creating;
mod deleting;
mod pending;
mod synced;

pub use creating::handle_creating;
pub use deleting::handle_deleting;
pub use pending::handle_pending;
pub use synced::handle_synced;

use tracing::{info, warn};

use super::{Action, Context};
use crate::crd::AccessPointPhase;
use crate::gateway::{AccessPointIdentity, GatewayError, ObservedAccessPoint};
use crate::status::{self, reasons};
use crate::store::ResourceRecord;
use crate::Error;

/// Move the record to `next` if the lifecycle allows it
pub fn transition(record: &mut ResourceRecord, next: AccessPointPhase) {
    let current = record.phase();
    if current == next {
        return;
    }
    if !current.can_transition_to(next) {
        warn!(from = %current, to = %next, "ignoring disallowed phase transition");
        return;
    }
    info!(from = %current, to = %next, "phase transition");
    let reported = record.status_mut();
    reported.phase = next;
    status::observe_phase(reported);
}

/// Record the identity returned by a create
fn record_identity(record: &mut ResourceRecord, identity: AccessPointIdentity) {
    let reported = record.status_mut();
    reported.identity = Some(identity.key);
    if identity.arn.is_some() {
        reported.access_point_arn = identity.arn;
    }
    if identity.alias.is_some() {
        reported.alias = identity.alias;
    }
}

/// Copy server-assigned fields of a fetched access point into the status
fn record_observed(record: &mut ResourceRecord, observed: &ObservedAccessPoint) {
    let reported = record.status_mut();
    reported.access_point_arn = Some(observed.arn.clone());
    reported.alias = Some(observed.alias.clone());
    reported.network_origin = Some(observed.network_origin.to_string());
}

/// A step succeeded: reset bookkeeping and clear failure conditions
fn record_success(record: &mut ResourceRecord) {
    record.attempts = 0;
    status::clear_failure(record.status_mut());
}

/// Enter `Error` and wait for the spec to change
fn fail_permanently(record: &mut ResourceRecord, reason: &str, message: String) -> Action {
    warn!(reason, %message, "access point failed permanently");
    record.attempts = 0;
    record.creating_since = None;
    status::record_failure(record.status_mut(), reason, message, true);
    transition(record, AccessPointPhase::Error);
    Action::await_change()
}

/// Record a retryable failure and back off
fn retry_later(record: &mut ResourceRecord, ctx: &Context, reason: &str, message: String) -> Action {
    record.attempts = record.attempts.saturating_add(1);
    let delay = ctx.config.backoff.delay_for_attempt(record.attempts);
    warn!(
        reason,
        %message,
        attempt = record.attempts,
        delay_ms = delay.as_millis() as u64,
        "retrying after failure"
    );
    status::record_failure(record.status_mut(), reason, message, false);
    Action::requeue(delay)
}

/// Record a call abandoned by shutdown. The phase and attempt count stay as they were.
fn record_cancelled(record: &mut ResourceRecord, ctx: &Context, operation: &str) -> Action {
    status::record_failure(
        record.status_mut(),
        reasons::CANCELLED,
        format!("{operation} cancelled by shutdown"),
        false,
    );
    Action::requeue(ctx.config.backoff.initial_delay)
}

/// Retry retryable gateway errors, fail permanently on the rest
fn handle_gateway_failure(
    record: &mut ResourceRecord,
    ctx: &Context,
    operation: &'static str,
    error: GatewayError,
) -> Action {
    if error == GatewayError::Cancelled {
        return record_cancelled(record, ctx, operation);
    }
    let reason = error.reason();
    let retryable = error.is_retryable();
    let message = Error::gateway(record.spec().key().to_string(), operation, error).to_string();
    if retryable {
        retry_later(record, ctx, reason, message)
    } else {
        fail_permanently(record, reason, message)
    }
}

/// Fail if the spec names a different access point than the one created
fn check_identity(record: &mut ResourceRecord) -> Result<(), Action> {
    let desired = record.spec().key();
    let assigned = record.resource.identity().cloned();
    match assigned {
        Some(assigned) if assigned != desired => {
            let err = Error::validation_for_field(
                desired.to_string(),
                "spec.name",
                format!("access point identity is immutable: created as {assigned}"),
            );
            Err(fail_permanently(record, err.reason(), err.to_string()))
        }
        _ => Ok(()),
    }
}
