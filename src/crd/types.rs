//! Supporting types for the AccessPoint CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of an AccessPoint record
///
/// Records move `Pending -> Creating -> Synced -> Deleting -> Deleted`.
/// `Error` is reachable from any non-terminal phase.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AccessPointPhase {
    /// Waiting for the first create call to succeed
    #[default]
    Pending,
    /// Created, waiting for the external system to report it active
    Creating,
    /// Observed state tracks the desired spec
    Synced,
    /// Deletion requested, external delete in progress
    Deleting,
    /// External resource is gone
    Deleted,
    /// Permanent failure; cleared only by a spec change
    Error,
}

impl AccessPointPhase {
    /// Returns true if no further reconciliation happens in this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// Staying in the same phase is always allowed.
    pub fn can_transition_to(&self, next: AccessPointPhase) -> bool {
        use AccessPointPhase::*;

        if *self == next {
            return true;
        }
        match (self, next) {
            (Deleted, _) => false,
            (Deleting, Deleted) => true,
            (Deleting, _) => false,
            (_, Deleting) => true,
            (Pending, Creating) | (Pending, Error) => true,
            (Creating, Synced) | (Creating, Pending) | (Creating, Error) => true,
            (Synced, Creating) | (Synced, Pending) | (Synced, Error) => true,
            (Error, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AccessPointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Creating => write!(f, "Creating"),
            Self::Synced => write!(f, "Synced"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Deleted => write!(f, "Deleted"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Identity of an access point in S3 Control: account plus name
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessPointKey {
    /// Owning AWS account id
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Access point name
    pub name: String,
}

impl AccessPointKey {
    /// Create a key from an account id and access point name
    pub fn new(account_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            name: name.into(),
        }
    }

    /// ARN of the access point in the given region
    pub fn arn(&self, region: &str) -> String {
        format!(
            "arn:aws:s3:{}:{}:accesspoint/{}",
            region, self.account_id, self.name
        )
    }
}

impl std::fmt::Display for AccessPointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_id, self.name)
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (Ready, Error, Terminal)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition status changed
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
