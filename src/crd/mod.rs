//! Custom Resource Definitions for the S3 Control controller
//!
//! This module contains the AccessPoint CRD and its supporting types.

mod access_point;
mod types;

pub use access_point::{
    AccessPoint, AccessPointSpec, AccessPointStatus, PublicAccessBlockConfiguration,
    VpcConfiguration, AWS_TAG_PREFIX,
};
pub use types::{AccessPointKey, AccessPointPhase, Condition, ConditionStatus};

use serde::Deserialize;

use crate::Error;

/// Parse a multi-document YAML stream into AccessPoint objects
///
/// Empty documents are skipped. Documents of another kind are rejected.
pub fn parse_manifests(yaml: &str) -> Result<Vec<AccessPoint>, Error> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let kind = value.get("kind").and_then(|k| k.as_str()).unwrap_or("");
        if kind != "AccessPoint" {
            return Err(Error::serialization(format!(
                "expected kind AccessPoint, found '{kind}'"
            )));
        }
        resources.push(serde_yaml::from_value(value)?);
    }
    Ok(resources)
}
