//! Finalizer bookkeeping for AccessPoint records
//!
//! A record carries [`ACCESS_POINT_FINALIZER`] for as long as its external
//! access point may exist. The finalizer is added before the first create and
//! released only once the record reaches `Deleted`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::crd::{AccessPoint, AccessPointPhase};
use crate::Error;

/// Finalizer guarding removal of AccessPoint records
pub const ACCESS_POINT_FINALIZER: &str = "finalizers.s3control.services.k8s.aws/AccessPoint";

/// Check if an access point has the finalizer
pub fn has_finalizer(ap: &AccessPoint) -> bool {
    ap.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == ACCESS_POINT_FINALIZER))
}

/// Add the finalizer if missing. Returns true if it was added.
pub fn ensure_finalizer(ap: &mut AccessPoint) -> bool {
    if has_finalizer(ap) {
        return false;
    }
    ap.finalizers_mut().push(ACCESS_POINT_FINALIZER.to_string());
    true
}

/// Remove the finalizer once the external access point is gone
///
/// Fails while the record is in any phase other than `Deleted`.
pub fn release_finalizer(ap: &mut AccessPoint) -> Result<bool, Error> {
    let phase = ap.phase();
    if phase != AccessPointPhase::Deleted {
        return Err(Error::internal(
            format!(
                "cannot release finalizer of {} in phase {phase}",
                ap.name_any()
            ),
            "finalizer::release_finalizer",
        ));
    }
    let finalizers = ap.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != ACCESS_POINT_FINALIZER);
    Ok(finalizers.len() != before)
}

/// Whether deletion of the record has been requested
pub fn is_deletion_requested(ap: &AccessPoint) -> bool {
    ap.metadata.deletion_timestamp.is_some()
}

/// Mark the record for deletion. Keeps the first request's timestamp.
pub fn request_deletion(ap: &mut AccessPoint) {
    if ap.metadata.deletion_timestamp.is_none() {
        ap.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    }
}
