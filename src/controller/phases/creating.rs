//! Creating phase handler.
//!
//! Polls the access point until S3 Control reports it active, bounded by the
//! creation deadline.

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    fail_permanently, handle_gateway_failure, handle_synced, record_cancelled, record_observed,
    record_success, transition,
};
use crate::controller::{Action, Context};
use crate::crd::{AccessPointKey, AccessPointPhase};
use crate::finalizer;
use crate::gateway::{GatewayError, ProvisioningStatus};
use crate::status::reasons;
use crate::store::ResourceRecord;
use crate::Error;

/// Handle a record in the Creating phase.
pub async fn handle_creating(record: &mut ResourceRecord, ctx: &Context) -> Action {
    finalizer::ensure_finalizer(&mut record.resource);

    let Some(key) = record.resource.identity().cloned() else {
        warn!("creating record has no identity, restarting creation");
        transition(record, AccessPointPhase::Pending);
        return Action::requeue(ctx.config.backoff.initial_delay);
    };
    // A restarted controller has no start instant; the deadline restarts with it
    let started = *record.creating_since.get_or_insert_with(Instant::now);

    match ctx.call("fetch", ctx.gateway.fetch(&key)).await {
        Ok(observed) => {
            record_observed(record, &observed);
            let status = observed.status;
            record.observed = Some(observed);
            match status {
                ProvisioningStatus::Active => {
                    record.creating_since = None;
                    record_success(record);
                    transition(record, AccessPointPhase::Synced);
                    handle_synced(record, ctx).await
                }
                ProvisioningStatus::Failed => fail_permanently(
                    record,
                    reasons::VALIDATION_ERROR,
                    format!("S3 Control reported access point {key} as failed"),
                ),
                ProvisioningStatus::Creating => {
                    debug!("access point still creating");
                    wait_for_active(record, ctx, &key, started)
                }
            }
        }
        Err(GatewayError::NotFound) => {
            // Not visible yet
            debug!("access point not found yet");
            wait_for_active(record, ctx, &key, started)
        }
        Err(GatewayError::Cancelled) => record_cancelled(record, ctx, "fetch"),
        Err(e) if e.is_retryable() => match deadline_exceeded(record, ctx, &key, started) {
            Some(action) => action,
            None => handle_gateway_failure(record, ctx, "fetch", e),
        },
        Err(e) => handle_gateway_failure(record, ctx, "fetch", e),
    }
}

/// Requeue at the poll interval, or fail once the deadline has passed
fn wait_for_active(
    record: &mut ResourceRecord,
    ctx: &Context,
    key: &AccessPointKey,
    started: Instant,
) -> Action {
    if let Some(action) = deadline_exceeded(record, ctx, key, started) {
        return action;
    }
    let remaining = ctx.config.creation_deadline.saturating_sub(started.elapsed());
    Action::requeue(ctx.config.poll_interval.min(remaining))
}

fn deadline_exceeded(
    record: &mut ResourceRecord,
    ctx: &Context,
    key: &AccessPointKey,
    started: Instant,
) -> Option<Action> {
    let elapsed = started.elapsed();
    if elapsed < ctx.config.creation_deadline {
        return None;
    }
    let err = Error::deadline_exceeded(key.to_string(), elapsed);
    Some(fail_permanently(record, err.reason(), err.to_string()))
}
