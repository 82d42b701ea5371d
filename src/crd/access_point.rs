//! AccessPoint Custom Resource Definition
//!
//! An AccessPoint is a named, policy-scoped entry point to an S3 bucket,
//! managed through the S3 Control API.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{AccessPointKey, AccessPointPhase, Condition};
use crate::Error;

/// Prefix reserved for AWS system tags
pub const AWS_TAG_PREFIX: &str = "aws:";

/// Desired configuration of an S3 Control access point
///
/// Example:
/// ```yaml
/// apiVersion: s3control.services.k8s.aws/v1alpha1
/// kind: AccessPoint
/// metadata:
///   name: ap-test-1
///   namespace: default
/// spec:
///   name: ap-test-1
///   accountID: "123456789012"
///   bucket: my-bucket
///   publicAccessBlockConfiguration:
///     blockPublicACLs: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3control.services.k8s.aws",
    version = "v1alpha1",
    kind = "AccessPoint",
    plural = "accesspoints",
    shortname = "ap",
    namespaced,
    status = "AccessPointStatus",
    printcolumn = r#"{"name":"Name","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".spec.bucket"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AccessPointSpec {
    /// Access point name, unique per account and region
    pub name: String,

    /// AWS account id that owns the access point
    #[serde(rename = "accountID")]
    pub account_id: String,

    /// Bucket the access point is attached to
    pub bucket: String,

    /// Account that owns the bucket, when different from `accountID`
    #[serde(
        rename = "bucketAccountID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bucket_account_id: Option<String>,

    /// Restricts the access point to a VPC. Absent means internet origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_configuration: Option<VpcConfiguration>,

    /// Public access block settings. Absent means every block enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_access_block_configuration: Option<PublicAccessBlockConfiguration>,

    /// Access point policy document (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    /// Resource tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// VPC restriction for an access point
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct VpcConfiguration {
    /// VPC id, e.g. `vpc-0a1b2c3d`
    #[serde(rename = "vpcID")]
    pub vpc_id: String,
}

/// Public access block settings for an access point
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PublicAccessBlockConfiguration {
    /// Reject requests that set public ACLs
    #[serde(rename = "blockPublicACLs", default = "default_true")]
    pub block_public_acls: bool,
    /// Ignore public ACLs on objects
    #[serde(rename = "ignorePublicACLs", default = "default_true")]
    pub ignore_public_acls: bool,
    /// Reject policies that grant public access
    #[serde(rename = "blockPublicPolicy", default = "default_true")]
    pub block_public_policy: bool,
    /// Restrict access to buckets with public policies
    #[serde(rename = "restrictPublicBuckets", default = "default_true")]
    pub restrict_public_buckets: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PublicAccessBlockConfiguration {
    fn default() -> Self {
        Self {
            block_public_acls: true,
            ignore_public_acls: true,
            block_public_policy: true,
            restrict_public_buckets: true,
        }
    }
}

/// Observed status of an AccessPoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessPointStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: AccessPointPhase,

    /// Ready, Error and Terminal conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Identity assigned by the first successful create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<AccessPointKey>,

    /// ARN reported by S3 Control
    #[serde(
        rename = "accessPointARN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_point_arn: Option<String>,

    /// Alias reported by S3 Control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// `Internet` or `VPC`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_origin: Option<String>,

    /// Spec generation this status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl AccessPointSpec {
    /// Identity key derived from the spec
    pub fn key(&self) -> AccessPointKey {
        AccessPointKey::new(&self.account_id, &self.name)
    }

    /// Public access block settings with the AWS default applied
    pub fn effective_public_access_block(&self) -> PublicAccessBlockConfiguration {
        self.public_access_block_configuration
            .clone()
            .unwrap_or_default()
    }

    /// Validate the spec against S3 Control naming and format rules
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)?;
        validate_account_id(&self.name, "spec.accountID", &self.account_id)?;

        if self.bucket.trim().is_empty() {
            return Err(Error::validation_for_field(
                &self.name,
                "spec.bucket",
                "bucket must not be empty",
            ));
        }

        if let Some(ref bucket_account) = self.bucket_account_id {
            validate_account_id(&self.name, "spec.bucketAccountID", bucket_account)?;
        }

        if let Some(ref vpc) = self.vpc_configuration {
            if !vpc.vpc_id.starts_with("vpc-") || vpc.vpc_id.len() <= "vpc-".len() {
                return Err(Error::validation_for_field(
                    &self.name,
                    "spec.vpcConfiguration.vpcID",
                    format!("'{}' is not a VPC id", vpc.vpc_id),
                ));
            }
        }

        if let Some(ref policy) = self.policy {
            let parsed: serde_json::Value = serde_json::from_str(policy).map_err(|e| {
                Error::validation_for_field(
                    &self.name,
                    "spec.policy",
                    format!("policy is not valid JSON: {e}"),
                )
            })?;
            if !parsed.is_object() {
                return Err(Error::validation_for_field(
                    &self.name,
                    "spec.policy",
                    "policy must be a JSON object",
                ));
            }
        }

        if let Some(key) = self.tags.keys().find(|k| k.starts_with(AWS_TAG_PREFIX)) {
            return Err(Error::validation_for_field(
                &self.name,
                "spec.tags",
                format!("tag key '{key}' uses the reserved '{AWS_TAG_PREFIX}' prefix"),
            ));
        }

        Ok(())
    }
}

/// Access point names: 3-50 chars, lowercase letters, digits and hyphens,
/// starting and ending with a letter or digit.
fn validate_name(name: &str) -> Result<(), Error> {
    let field = "spec.name";
    if !(3..=50).contains(&name.len()) {
        return Err(Error::validation_for_field(
            name,
            field,
            "name must be between 3 and 50 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::validation_for_field(
            name,
            field,
            "name may only contain lowercase letters, digits and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::validation_for_field(
            name,
            field,
            "name must start and end with a letter or digit",
        ));
    }
    Ok(())
}

fn validate_account_id(resource: &str, field: &str, account_id: &str) -> Result<(), Error> {
    if account_id.len() != 12 || !account_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::validation_for_field(
            resource,
            field,
            format!("'{account_id}' is not a 12-digit account id"),
        ));
    }
    Ok(())
}

impl AccessPoint {
    /// Current phase, defaulting to Pending when no status is set
    pub fn phase(&self) -> AccessPointPhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    /// Identity assigned by the controller, if any
    pub fn identity(&self) -> Option<&AccessPointKey> {
        self.status.as_ref().and_then(|s| s.identity.as_ref())
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut AccessPointStatus {
        self.status.get_or_insert_with(AccessPointStatus::default)
    }
}
