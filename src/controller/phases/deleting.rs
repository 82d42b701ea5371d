//! Deleting phase handler.
//!
//! Deletes the access point and releases the finalizer once it is gone. A
//! record never leaves Deleting for anything but Deleted.

use tracing::{error, info, warn};

use super::{record_cancelled, record_success, transition};
use crate::controller::{Action, Context};
use crate::crd::{AccessPointKey, AccessPointPhase};
use crate::diff::{self, Operation};
use crate::finalizer;
use crate::gateway::GatewayError;
use crate::status::{self, reasons};
use crate::store::ResourceRecord;
use crate::Error;

/// Handle a record in the Deleting phase.
pub async fn handle_deleting(record: &mut ResourceRecord, ctx: &Context) -> Action {
    let key = match record.resource.identity().cloned() {
        Some(key) => key,
        // Nothing can have been created for a spec the gateway would reject
        None if record.spec().validate().is_err() => return finish(record),
        None => match unrecorded_access_point(record, ctx).await {
            Ok(Some(key)) => key,
            Ok(None) => return finish(record),
            Err(action) => return action,
        },
    };

    let op = Operation::delete(key);
    match ctx.call(op.name(), op.execute(ctx.gateway.as_ref())).await {
        Ok(_) => {
            info!(access_point = %op.key, "access point deleted");
            finish(record)
        }
        Err(e) => delete_failed(record, ctx, &op.key, op.name(), e),
    }
}

/// Look for an access point whose create reply was lost
///
/// Only one matching the spec's immutable fields was created by this record.
/// A same-named access point on another bucket is left alone.
async fn unrecorded_access_point(
    record: &mut ResourceRecord,
    ctx: &Context,
) -> Result<Option<AccessPointKey>, Action> {
    let key = record.spec().key();
    match ctx.call("fetch", ctx.gateway.fetch(&key)).await {
        Ok(observed) => match diff::adopt(&key, record.spec(), &observed) {
            Ok(_) => Ok(Some(key)),
            Err(e) => {
                info!(access_point = %key, reason = %e, "leaving access point owned by someone else");
                Ok(None)
            }
        },
        Err(GatewayError::NotFound) => Ok(None),
        Err(e) => Err(delete_failed(record, ctx, &key, "fetch", e)),
    }
}

/// Back off after a failed call; permanent errors retry at the capped delay
fn delete_failed(
    record: &mut ResourceRecord,
    ctx: &Context,
    key: &AccessPointKey,
    operation: &'static str,
    e: GatewayError,
) -> Action {
    if e == GatewayError::Cancelled {
        return record_cancelled(record, ctx, operation);
    }
    let reason = e.reason();
    let retryable = e.is_retryable();
    let message = Error::gateway(key.to_string(), operation, e).to_string();

    if !retryable {
        warn!(%message, "delete rejected, retrying at capped delay");
        status::record_failure(record.status_mut(), reason, message, true);
        return Action::requeue(ctx.config.backoff.max_delay);
    }

    record.attempts = record.attempts.saturating_add(1);
    if record.attempts >= ctx.config.max_delete_attempts {
        warn!(attempt = record.attempts, %message, "delete retries exhausted");
        let message = format!("{} failed attempts: {message}", record.attempts);
        status::record_failure(
            record.status_mut(),
            reasons::DELETE_RETRIES_EXHAUSTED,
            message,
            false,
        );
        return Action::requeue(ctx.config.backoff.max_delay);
    }

    let delay = ctx.config.backoff.delay_for_attempt(record.attempts);
    warn!(attempt = record.attempts, %message, "delete failed, retrying");
    status::record_failure(record.status_mut(), reason, message, false);
    Action::requeue(delay)
}

fn finish(record: &mut ResourceRecord) -> Action {
    record.observed = None;
    record.creating_since = None;
    record_success(record);
    transition(record, AccessPointPhase::Deleted);
    if let Err(e) = finalizer::release_finalizer(&mut record.resource) {
        error!(error = %e, "failed to release finalizer");
    }
    Action::await_change()
}
