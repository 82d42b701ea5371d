//! Synced phase handler.
//!
//! Re-observes the access point, diffs it against the spec and applies the
//! resulting operations in order.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    check_identity, fail_permanently, record_cancelled, record_identity, record_observed,
    record_success, retry_later, transition,
};
use crate::controller::{Action, Context};
use crate::crd::AccessPointPhase;
use crate::diff::diff;
use crate::gateway::GatewayError;
use crate::status;
use crate::store::ResourceRecord;
use crate::Error;

/// Handle a record in the Synced phase.
pub async fn handle_synced(record: &mut ResourceRecord, ctx: &Context) -> Action {
    let Some(key) = record.resource.identity().cloned() else {
        warn!("synced record has no identity, restarting creation");
        transition(record, AccessPointPhase::Pending);
        return Action::requeue(ctx.config.backoff.initial_delay);
    };
    if let Err(action) = check_identity(record) {
        return action;
    }

    let observed = match ctx.call("fetch", ctx.gateway.fetch(&key)).await {
        Ok(observed) => Some(observed),
        Err(GatewayError::NotFound) => None,
        Err(e) => return apply_failure(record, ctx, "fetch", e),
    };
    if let Some(ref observed) = observed {
        record_observed(record, observed);
    }
    record.observed = observed;

    let ops = match diff(&key, record.spec(), record.observed.as_ref()) {
        Ok(ops) => ops,
        Err(e) => return fail_permanently(record, e.reason(), e.to_string()),
    };

    if ops.is_empty() {
        debug!("access point in sync");
        record_success(record);
        return Action::requeue(ctx.config.resync_interval);
    }

    info!(count = ops.len(), "applying operations");
    for op in &ops {
        match ctx.call(op.name(), op.execute(ctx.gateway.as_ref())).await {
            Ok(Some(identity)) if op.is_create() => {
                warn!(access_point = %key, "access point vanished, recreated");
                record_identity(record, identity);
                record_success(record);
                record.observed = None;
                record.creating_since = Some(Instant::now());
                transition(record, AccessPointPhase::Creating);
                return Action::requeue(ctx.config.poll_interval);
            }
            Ok(_) => debug!(operation = %op, "operation applied"),
            Err(e) => return apply_failure(record, ctx, op.name(), e),
        }
    }

    record_success(record);
    // Re-observe to confirm convergence
    Action::requeue(ctx.config.poll_interval)
}

/// A failed step keeps the record Synced: transient errors retry the whole
/// batch with backoff, permanent ones wait for a spec change.
fn apply_failure(
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
        return retry_later(record, ctx, reason, message);
    }
    warn!(operation, %message, "operation rejected");
    record.attempts = 0;
    status::record_failure(record.status_mut(), reason, message, true);
    Action::await_change()
}
