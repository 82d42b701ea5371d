//! Pending phase handler.
//!
//! Validates the spec and issues the create call.

use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    check_identity, fail_permanently, handle_creating, handle_gateway_failure, record_identity,
    record_success, retry_later, transition,
};
use crate::controller::{Action, Context};
use crate::crd::{AccessPointKey, AccessPointPhase};
use crate::diff::{self, Operation};
use crate::finalizer;
use crate::gateway::{AccessPointIdentity, GatewayError};
use crate::status::reasons;
use crate::store::ResourceRecord;

/// Handle a record in the Pending phase.
///
/// A successful create moves the record to Creating and polls it in the same
/// pass. A conflicting create does the same only when the existing access
/// point matches the spec.
pub async fn handle_pending(record: &mut ResourceRecord, ctx: &Context) -> Action {
    if finalizer::ensure_finalizer(&mut record.resource) {
        debug!("added finalizer");
    }

    if let Err(e) = record.spec().validate() {
        return fail_permanently(record, e.reason(), e.to_string());
    }
    if let Err(action) = check_identity(record) {
        return action;
    }

    let op = Operation::create(record.spec());
    let identity = match ctx.call(op.name(), op.execute(ctx.gateway.as_ref())).await {
        Ok(identity) => identity.unwrap_or_else(|| AccessPointIdentity::derived(op.key.clone())),
        Err(GatewayError::Conflict(_)) => match adopt_existing(record, ctx, &op.key).await {
            Ok(identity) => identity,
            Err(action) => return action,
        },
        Err(e) => return handle_gateway_failure(record, ctx, op.name(), e),
    };

    info!(access_point = %identity.key, arn = ?identity.arn, "create accepted");
    record_identity(record, identity);
    record_success(record);
    record.creating_since = Some(Instant::now());
    transition(record, AccessPointPhase::Creating);
    handle_creating(record, ctx).await
}

/// Fetch the access point a create conflicted with and adopt it if it matches
async fn adopt_existing(
    record: &mut ResourceRecord,
    ctx: &Context,
    key: &AccessPointKey,
) -> Result<AccessPointIdentity, Action> {
    let observed = match ctx.call("fetch", ctx.gateway.fetch(key)).await {
        Ok(observed) => observed,
        Err(GatewayError::NotFound) => {
            return Err(retry_later(
                record,
                ctx,
                reasons::CONFLICT,
                format!("access point {key} already exists but is not visible yet"),
            ));
        }
        Err(e) => return Err(handle_gateway_failure(record, ctx, "fetch", e)),
    };

    match diff::adopt(key, record.spec(), &observed) {
        Ok(identity) => Ok(identity),
        Err(e) => {
            // Never keep an identity pointing at an access point we do not own
            let reported = record.status_mut();
            reported.identity = None;
            reported.access_point_arn = None;
            reported.alias = None;
            Err(fail_permanently(
                record,
                reasons::CONFLICT,
                format!("access point {key} already exists and belongs to another owner: {e}"),
            ))
        }
    }
}
