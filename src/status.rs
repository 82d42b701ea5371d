//! Status conditions for AccessPoint records
//!
//! Each record carries at most one condition per type. Setting a condition
//! overwrites the previous one of the same type and moves its
//! `lastTransitionTime` only when the status flips.

use crate::crd::{AccessPointPhase, AccessPointStatus, Condition, ConditionStatus};

/// Condition types
pub mod condition_types {
    /// The access point matches the desired spec
    pub const READY: &str = "Ready";
    /// The last attempt failed
    pub const ERROR: &str = "Error";
    /// The failure will not resolve without a spec change
    pub const TERMINAL: &str = "Terminal";
}

/// Machine-readable condition reasons
pub mod reasons {
    /// Retryable failure such as throttling or a timeout
    pub const TRANSIENT_ERROR: &str = "TransientError";
    /// The external resource was not found
    pub const NOT_FOUND: &str = "NotFound";
    /// The external resource already exists
    pub const CONFLICT: &str = "Conflict";
    /// The spec cannot be realized as written
    pub const VALIDATION_ERROR: &str = "ValidationError";
    /// The record failed and its failure condition has since cleared
    pub const FAILED: &str = "Failed";
    /// Creation did not finish in time
    pub const DEADLINE_EXCEEDED: &str = "DeadlineExceeded";
    /// A gateway call was abandoned during shutdown
    pub const CANCELLED: &str = "Cancelled";
    /// Delete failed more times than allowed; still retrying
    pub const DELETE_RETRIES_EXHAUSTED: &str = "DeleteRetriesExhausted";
    /// Waiting for the first create
    pub const PENDING: &str = "Pending";
    /// Waiting for the access point to become active
    pub const CREATING: &str = "Creating";
    /// Observed state matches the spec
    pub const SYNCED: &str = "Synced";
    /// Deleting the access point
    pub const DELETING: &str = "Deleting";
    /// The access point is gone
    pub const DELETED: &str = "Deleted";
    /// A previous failure cleared
    pub const RECOVERED: &str = "Recovered";
}

/// Set a condition, replacing any existing one of the same type
///
/// The transition time is carried over when the status did not change.
pub fn set_condition(status: &mut AccessPointStatus, condition: Condition) {
    match status
        .conditions
        .iter_mut()
        .find(|c| c.type_ == condition.type_)
    {
        Some(existing) => {
            let last_transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
        }
        None => status.conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(status: &'a AccessPointStatus, type_: &str) -> Option<&'a Condition> {
    status.conditions.iter().find(|c| c.type_ == type_)
}

/// Whether a condition of the given type is `True`
pub fn is_condition_true(status: &AccessPointStatus, type_: &str) -> bool {
    find_condition(status, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Update `Ready` to reflect the current phase
///
/// While an `Error` condition is active, `Ready` is `False` and carries the
/// failure reason, except once the record is `Deleted`.
pub fn observe_phase(status: &mut AccessPointStatus) {
    if status.phase != AccessPointPhase::Deleted {
        let failure = find_condition(status, condition_types::ERROR)
            .filter(|c| c.status == ConditionStatus::True)
            .map(|c| (c.reason.clone(), c.message.clone()));
        if let Some((reason, message)) = failure {
            set_condition(
                status,
                Condition::new(condition_types::READY, ConditionStatus::False, reason, message),
            );
            return;
        }
    }

    let (ready, reason, message) = match status.phase {
        AccessPointPhase::Pending => (
            ConditionStatus::False,
            reasons::PENDING,
            "Waiting to create access point",
        ),
        AccessPointPhase::Creating => (
            ConditionStatus::False,
            reasons::CREATING,
            "Waiting for access point to become active",
        ),
        AccessPointPhase::Synced => (
            ConditionStatus::True,
            reasons::SYNCED,
            "Access point matches the desired spec",
        ),
        AccessPointPhase::Deleting => (
            ConditionStatus::False,
            reasons::DELETING,
            "Deleting access point",
        ),
        AccessPointPhase::Deleted => (
            ConditionStatus::False,
            reasons::DELETED,
            "Access point deleted",
        ),
        AccessPointPhase::Error => (
            ConditionStatus::False,
            reasons::FAILED,
            "Access point failed",
        ),
    };
    set_condition(
        status,
        Condition::new(condition_types::READY, ready, reason, message),
    );
}

/// Record a failed attempt
///
/// `terminal` additionally sets `Terminal=True`: the failure will not clear
/// on retry.
pub fn record_failure(
    status: &mut AccessPointStatus,
    reason: &str,
    message: impl Into<String>,
    terminal: bool,
) {
    let message = message.into();
    set_condition(
        status,
        Condition::new(
            condition_types::ERROR,
            ConditionStatus::True,
            reason,
            message.clone(),
        ),
    );
    if terminal {
        set_condition(
            status,
            Condition::new(condition_types::TERMINAL, ConditionStatus::True, reason, message),
        );
    }
}

/// Clear `Error` and `Terminal` after a successful step
///
/// Conditions that were never set stay absent.
pub fn clear_failure(status: &mut AccessPointStatus) {
    for type_ in [condition_types::ERROR, condition_types::TERMINAL] {
        if is_condition_true(status, type_) {
            set_condition(
                status,
                Condition::new(type_, ConditionStatus::False, reasons::RECOVERED, ""),
            );
        }
    }
}
