//! S3 Control gateway
//!
//! [`AccessPointGateway`] is the typed contract the engine uses to talk to
//! the S3 Control API for access points. Every call is keyed by
//! [`AccessPointKey`] and every mutating call is idempotent: replaying a call
//! that already took effect leaves the external state unchanged.
//!
//! [`memory::MemoryGateway`] implements the contract in memory with fault
//! injection.

pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::{AccessPointKey, AccessPointSpec, PublicAccessBlockConfiguration, VpcConfiguration};
use crate::error::ErrorKind;

/// Identity returned by a successful create
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPointIdentity {
    /// Account and name
    pub key: AccessPointKey,
    /// ARN assigned by S3 Control
    #[serde(rename = "accessPointARN", skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    /// Alias assigned by S3 Control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AccessPointIdentity {
    /// Identity derived from the key alone, for a create that returned none
    pub fn derived(key: AccessPointKey) -> Self {
        Self {
            key,
            arn: None,
            alias: None,
        }
    }
}

/// Provisioning state reported by S3 Control
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningStatus {
    /// Still being provisioned
    Creating,
    /// Ready for use
    Active,
    /// Provisioning failed and will not recover
    Failed,
}

/// Where requests to the access point may originate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkOrigin {
    /// Reachable from the internet
    Internet,
    /// Reachable only from the configured VPC
    #[serde(rename = "VPC")]
    Vpc,
}

impl std::fmt::Display for NetworkOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internet => write!(f, "Internet"),
            Self::Vpc => write!(f, "VPC"),
        }
    }
}

/// Access point as reported by S3 Control
///
/// Carries every desired field plus server-assigned read-only fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedAccessPoint {
    /// Access point name
    pub name: String,
    /// Owning account
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Parent bucket
    pub bucket: String,
    /// Account owning the bucket
    #[serde(rename = "bucketAccountID")]
    pub bucket_account_id: String,
    /// VPC restriction
    pub vpc_configuration: Option<VpcConfiguration>,
    /// Effective public access block settings
    pub public_access_block_configuration: PublicAccessBlockConfiguration,
    /// Policy document, if one is attached
    pub policy: Option<String>,
    /// Tags, including `aws:` system tags
    pub tags: BTreeMap<String, String>,
    /// ARN
    #[serde(rename = "accessPointARN")]
    pub arn: String,
    /// Alias
    pub alias: String,
    /// Network origin derived from the VPC configuration
    pub network_origin: NetworkOrigin,
    /// When S3 Control created the access point
    pub creation_date: DateTime<Utc>,
    /// Provisioning state
    pub status: ProvisioningStatus,
}

impl ObservedAccessPoint {
    /// Identity key of the observed access point
    pub fn key(&self) -> AccessPointKey {
        AccessPointKey::new(&self.account_id, &self.name)
    }

    /// Identity including the server-assigned ARN and alias
    pub fn identity(&self) -> AccessPointIdentity {
        AccessPointIdentity {
            key: self.key(),
            arn: Some(self.arn.clone()),
            alias: Some(self.alias.clone()),
        }
    }
}

/// Errors returned by the S3 Control gateway
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The access point does not exist
    #[error("access point not found")]
    NotFound,

    /// The access point already exists
    #[error("access point already exists: {0}")]
    Conflict(String),

    /// Request rate exceeded
    #[error("request throttled")]
    Throttled,

    /// The call did not complete in time
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// S3 Control is unavailable
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request is malformed or not allowed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The identity does not address a valid access point
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// The call was abandoned because the controller is shutting down
    #[error("call cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Throttled
            | Self::Timeout(_)
            | Self::ServiceUnavailable(_)
            | Self::Cancelled => ErrorKind::Transient,
            Self::InvalidRequest(_) | Self::InvalidIdentity(_) => ErrorKind::Validation,
        }
    }

    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Cancelled => "Cancelled",
            other => other.kind().reason(),
        }
    }

    /// Returns true if the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Client contract for S3 Control access points
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessPointGateway: Send + Sync {
    /// Read the current state of an access point
    async fn fetch(&self, key: &AccessPointKey) -> Result<ObservedAccessPoint, GatewayError>;

    /// Create an access point
    ///
    /// Returns [`GatewayError::Conflict`] if it already exists.
    async fn create(&self, spec: &AccessPointSpec) -> Result<AccessPointIdentity, GatewayError>;

    /// Attach or replace the access point policy
    async fn put_policy(&self, key: &AccessPointKey, document: &str) -> Result<(), GatewayError>;

    /// Remove the access point policy. Succeeds if none is attached.
    async fn delete_policy(&self, key: &AccessPointKey) -> Result<(), GatewayError>;

    /// Add or overwrite tags
    async fn tag_resource(
        &self,
        key: &AccessPointKey,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), GatewayError>;

    /// Remove tags by key. Keys that are not present are ignored.
    async fn untag_resource(&self, key: &AccessPointKey, keys: &[String])
        -> Result<(), GatewayError>;

    /// Delete the access point
    ///
    /// Returns [`GatewayError::NotFound`] if it does not exist.
    async fn delete(&self, key: &AccessPointKey) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_classify_into_taxonomy() {
        assert_eq!(GatewayError::NotFound.kind(), ErrorKind::NotFound);
        assert_eq!(GatewayError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(GatewayError::Throttled.kind(), ErrorKind::Transient);
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            GatewayError::InvalidIdentity("x".into()).kind(),
            ErrorKind::Validation
        );
        assert!(!GatewayError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn cancelled_is_transient_with_its_own_reason() {
        assert!(GatewayError::Cancelled.is_retryable());
        assert_eq!(GatewayError::Cancelled.reason(), "Cancelled");
        assert_eq!(GatewayError::Throttled.reason(), "TransientError");
    }

    #[test]
    fn network_origin_uses_aws_names() {
        assert_eq!(NetworkOrigin::Vpc.to_string(), "VPC");
        assert_eq!(serde_json::to_value(NetworkOrigin::Vpc).unwrap(), "VPC");
        assert_eq!(
            serde_json::to_value(NetworkOrigin::Internet).unwrap(),
            "Internet"
        );
    }

    #[test]
    fn derived_identity_has_no_server_fields() {
        let identity = AccessPointIdentity::derived(AccessPointKey::new("123456789012", "ap"));
        assert!(identity.arn.is_none());
        assert!(identity.alias.is_none());
    }
}
