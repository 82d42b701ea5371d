//! Desired/observed state comparison
//!
//! [`diff`] compares an [`AccessPointSpec`] against the access point S3
//! Control reports and returns the minimal ordered list of [`Operation`]s
//! that converges them. Server-assigned fields never produce operations.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::crd::{AccessPointKey, AccessPointSpec, AWS_TAG_PREFIX};
use crate::gateway::{AccessPointGateway, AccessPointIdentity, GatewayError, ObservedAccessPoint};
use crate::Error;

/// A single idempotent step against the gateway
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// Access point the step applies to
    pub key: AccessPointKey,
    /// What to do
    pub kind: OperationKind,
}

/// Kinds of [`Operation`]
#[derive(Clone, Debug, PartialEq)]
pub enum OperationKind {
    /// Create the access point from the spec
    Create(Box<AccessPointSpec>),
    /// Attach or replace the policy
    PutPolicy(String),
    /// Remove the policy
    DeletePolicy,
    /// Add or overwrite tags
    TagResource(BTreeMap<String, String>),
    /// Remove tags by key
    UntagResource(Vec<String>),
    /// Delete the access point
    Delete,
}

impl Operation {
    /// Create operation for a spec
    pub fn create(spec: &AccessPointSpec) -> Self {
        Self {
            key: spec.key(),
            kind: OperationKind::Create(Box::new(spec.clone())),
        }
    }

    /// Delete operation for a key
    pub fn delete(key: AccessPointKey) -> Self {
        Self {
            key,
            kind: OperationKind::Delete,
        }
    }

    /// Gateway call name, used in logs and errors
    pub fn name(&self) -> &'static str {
        match self.kind {
            OperationKind::Create(_) => "create",
            OperationKind::PutPolicy(_) => "put_policy",
            OperationKind::DeletePolicy => "delete_policy",
            OperationKind::TagResource(_) => "tag_resource",
            OperationKind::UntagResource(_) => "untag_resource",
            OperationKind::Delete => "delete",
        }
    }

    /// Returns true for [`OperationKind::Create`]
    pub fn is_create(&self) -> bool {
        matches!(self.kind, OperationKind::Create(_))
    }

    /// Run the operation against the gateway
    ///
    /// A create that conflicts fails with [`GatewayError::Conflict`]; the
    /// caller decides with [`adopt`] whether the existing access point is its
    /// own. A delete of a missing access point succeeds. Only a create
    /// returns an identity.
    pub async fn execute(
        &self,
        gateway: &dyn AccessPointGateway,
    ) -> Result<Option<AccessPointIdentity>, GatewayError> {
        match &self.kind {
            OperationKind::Create(spec) => gateway.create(spec).await.map(Some),
            OperationKind::PutPolicy(document) => {
                gateway.put_policy(&self.key, document).await.map(|_| None)
            }
            OperationKind::DeletePolicy => gateway.delete_policy(&self.key).await.map(|_| None),
            OperationKind::TagResource(tags) => {
                gateway.tag_resource(&self.key, tags).await.map(|_| None)
            }
            OperationKind::UntagResource(keys) => {
                gateway.untag_resource(&self.key, keys).await.map(|_| None)
            }
            OperationKind::Delete => match gateway.delete(&self.key).await {
                Ok(()) | Err(GatewayError::NotFound) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.key)
    }
}

/// Compute the operations that converge `observed` onto `desired`
///
/// `None` for `observed` means the access point does not exist and yields a
/// single create. Drift in a field S3 Control cannot update in place is a
/// validation error naming the field.
pub fn diff(
    key: &AccessPointKey,
    desired: &AccessPointSpec,
    observed: Option<&ObservedAccessPoint>,
) -> Result<Vec<Operation>, Error> {
    let Some(observed) = observed else {
        return Ok(vec![Operation::create(desired)]);
    };

    check_immutable(key, desired, observed)?;

    let mut ops = Vec::new();
    let op = |kind| Operation {
        key: key.clone(),
        kind,
    };

    match (&desired.policy, &observed.policy) {
        (Some(want), Some(have)) => {
            let want_doc = parse_policy(key, want)?;
            let same = serde_json::from_str::<Value>(have)
                .map(|have_doc| canonicalize(have_doc) == canonicalize(want_doc))
                .unwrap_or(false);
            if !same {
                ops.push(op(OperationKind::PutPolicy(want.clone())));
            }
        }
        (Some(want), None) => {
            parse_policy(key, want)?;
            ops.push(op(OperationKind::PutPolicy(want.clone())));
        }
        (None, Some(_)) => ops.push(op(OperationKind::DeletePolicy)),
        (None, None) => {}
    }

    let stale: Vec<String> = observed
        .tags
        .keys()
        .filter(|k| !k.starts_with(AWS_TAG_PREFIX) && !desired.tags.contains_key(*k))
        .cloned()
        .collect();
    if !stale.is_empty() {
        ops.push(op(OperationKind::UntagResource(stale)));
    }

    let changed: BTreeMap<String, String> = desired
        .tags
        .iter()
        .filter(|(k, v)| observed.tags.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !changed.is_empty() {
        ops.push(op(OperationKind::TagResource(changed)));
    }

    Ok(ops)
}

/// Identity of an existing access point that `desired` may take over
///
/// An access point found under the spec's name is only adoptable when every
/// field S3 Control cannot update in place matches. Anything else belongs to
/// someone else and must be neither modified nor deleted.
pub fn adopt(
    key: &AccessPointKey,
    desired: &AccessPointSpec,
    observed: &ObservedAccessPoint,
) -> Result<AccessPointIdentity, Error> {
    check_immutable(key, desired, observed)?;
    debug!(access_point = %key, "existing access point matches, adopting it");
    Ok(AccessPointIdentity {
        key: key.clone(),
        arn: Some(observed.arn.clone()),
        alias: Some(observed.alias.clone()),
    })
}

fn check_immutable(
    key: &AccessPointKey,
    desired: &AccessPointSpec,
    observed: &ObservedAccessPoint,
) -> Result<(), Error> {
    let drift = |field: &str, want: String, have: String| {
        Error::validation_for_field(
            key.to_string(),
            field,
            format!("{field} cannot be changed after creation (desired {want}, observed {have})"),
        )
    };

    if desired.bucket != observed.bucket {
        return Err(drift(
            "spec.bucket",
            desired.bucket.clone(),
            observed.bucket.clone(),
        ));
    }
    if let Some(ref want) = desired.bucket_account_id {
        if *want != observed.bucket_account_id {
            return Err(drift(
                "spec.bucketAccountID",
                want.clone(),
                observed.bucket_account_id.clone(),
            ));
        }
    }
    if desired.vpc_configuration != observed.vpc_configuration {
        return Err(drift(
            "spec.vpcConfiguration",
            format!("{:?}", desired.vpc_configuration),
            format!("{:?}", observed.vpc_configuration),
        ));
    }
    let pab = desired.effective_public_access_block();
    if pab != observed.public_access_block_configuration {
        return Err(drift(
            "spec.publicAccessBlockConfiguration",
            format!("{pab:?}"),
            format!("{:?}", observed.public_access_block_configuration),
        ));
    }
    Ok(())
}

fn parse_policy(key: &AccessPointKey, document: &str) -> Result<Value, Error> {
    serde_json::from_str(document).map_err(|e| {
        Error::validation_for_field(
            key.to_string(),
            "spec.policy",
            format!("policy is not valid JSON: {e}"),
        )
    })
}

/// Normalize a policy document for semantic comparison
///
/// Object key order is already irrelevant to `Value` equality. Arrays are
/// treated as sets, and single-element arrays equal their element, matching
/// how IAM evaluates `"Action": "s3:GetObject"` and `"Action": ["s3:GetObject"]`.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(canonicalize).collect();
            items.sort_by_cached_key(|v| v.to_string());
            items.dedup();
            if items.len() == 1 {
                items.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(items)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PublicAccessBlockConfiguration, VpcConfiguration};
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::{NetworkOrigin, ProvisioningStatus};
    use chrono::Utc;

    fn key() -> AccessPointKey {
        AccessPointKey::new("123456789012", "ap-test-1")
    }

    fn desired() -> AccessPointSpec {
        AccessPointSpec {
            name: "ap-test-1".to_string(),
            account_id: "123456789012".to_string(),
            bucket: "bootstrap-bucket".to_string(),
            bucket_account_id: None,
            vpc_configuration: None,
            public_access_block_configuration: None,
            policy: None,
            tags: BTreeMap::from([("team".to_string(), "storage".to_string())]),
        }
    }

    /// Observed state matching `desired()` after projecting server fields
    fn observed() -> ObservedAccessPoint {
        ObservedAccessPoint {
            name: "ap-test-1".to_string(),
            account_id: "123456789012".to_string(),
            bucket: "bootstrap-bucket".to_string(),
            bucket_account_id: "123456789012".to_string(),
            vpc_configuration: None,
            public_access_block_configuration: PublicAccessBlockConfiguration::default(),
            policy: None,
            tags: BTreeMap::from([
                ("team".to_string(), "storage".to_string()),
                (
                    "aws:cloudformation:stack-name".to_string(),
                    "infra".to_string(),
                ),
            ]),
            arn: key().arn("us-west-2"),
            alias: "ap-test-1-abc-s3alias".to_string(),
            network_origin: NetworkOrigin::Internet,
            creation_date: Utc::now(),
            status: ProvisioningStatus::Active,
        }
    }

    fn field_of(err: Error) -> Option<String> {
        match err {
            Error::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn absent_observed_yields_single_create() {
        let ops = diff(&key(), &desired(), None).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_create());
        assert_eq!(ops[0].to_string(), "create 123456789012/ap-test-1");
    }

    #[test]
    fn converged_state_yields_nothing() {
        assert!(diff(&key(), &desired(), Some(&observed()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn server_fields_never_produce_operations() {
        let mut obs = observed();
        obs.arn = "arn:other".to_string();
        obs.alias = "other".to_string();
        obs.network_origin = NetworkOrigin::Internet;
        obs.status = ProvisioningStatus::Creating;
        obs.creation_date = Utc::now() - chrono::Duration::days(30);
        assert!(diff(&key(), &desired(), Some(&obs)).unwrap().is_empty());
    }

    #[test]
    fn explicit_default_public_access_block_equals_absent() {
        let mut spec = desired();
        spec.public_access_block_configuration = Some(PublicAccessBlockConfiguration::default());
        assert!(diff(&key(), &spec, Some(&observed())).unwrap().is_empty());
    }

    #[test]
    fn immutable_drift_names_the_field() {
        let mut spec = desired();
        spec.bucket = "other-bucket".to_string();
        assert_eq!(
            field_of(diff(&key(), &spec, Some(&observed())).unwrap_err()).as_deref(),
            Some("spec.bucket")
        );

        let mut spec = desired();
        spec.vpc_configuration = Some(VpcConfiguration {
            vpc_id: "vpc-123".to_string(),
        });
        assert_eq!(
            field_of(diff(&key(), &spec, Some(&observed())).unwrap_err()).as_deref(),
            Some("spec.vpcConfiguration")
        );

        let mut spec = desired();
        spec.public_access_block_configuration = Some(PublicAccessBlockConfiguration {
            block_public_policy: false,
            ..Default::default()
        });
        assert_eq!(
            field_of(diff(&key(), &spec, Some(&observed())).unwrap_err()).as_deref(),
            Some("spec.publicAccessBlockConfiguration")
        );

        let mut spec = desired();
        spec.bucket_account_id = Some("210987654321".to_string());
        assert_eq!(
            field_of(diff(&key(), &spec, Some(&observed())).unwrap_err()).as_deref(),
            Some("spec.bucketAccountID")
        );
    }

    #[test]
    fn matching_bucket_account_is_not_drift() {
        let mut spec = desired();
        spec.bucket_account_id = Some("123456789012".to_string());
        assert!(diff(&key(), &spec, Some(&observed())).unwrap().is_empty());
    }

    #[test]
    fn policy_added_changed_and_removed() {
        let doc = r#"{"Version":"2012-10-17","Statement":[]}"#;
        let mut spec = desired();
        spec.policy = Some(doc.to_string());

        let ops = diff(&key(), &spec, Some(&observed())).unwrap();
        assert_eq!(ops[0].kind, OperationKind::PutPolicy(doc.to_string()));

        let mut obs = observed();
        obs.policy = Some(r#"{"Version":"2008-10-17","Statement":[]}"#.to_string());
        let ops = diff(&key(), &spec, Some(&obs)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name(), "put_policy");

        let ops = diff(&key(), &desired(), Some(&obs)).unwrap();
        assert_eq!(ops, vec![Operation {
            key: key(),
            kind: OperationKind::DeletePolicy
        }]);
    }

    #[test]
    fn policy_compares_semantically() {
        let mut spec = desired();
        spec.policy = Some(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["s3:GetObject","s3:PutObject"],"Resource":"*"}]}"#
                .to_string(),
        );
        let mut obs = observed();
        obs.policy = Some(
            r#"{
                "Statement": {"Resource": ["*"], "Action": ["s3:PutObject", "s3:GetObject"], "Effect": "Allow"},
                "Version": "2012-10-17"
            }"#
            .to_string(),
        );
        assert!(diff(&key(), &spec, Some(&obs)).unwrap().is_empty());
    }

    #[test]
    fn unparseable_observed_policy_is_replaced() {
        let mut spec = desired();
        spec.policy = Some("{}".to_string());
        let mut obs = observed();
        obs.policy = Some("garbage".to_string());
        let ops = diff(&key(), &spec, Some(&obs)).unwrap();
        assert_eq!(ops[0].kind, OperationKind::PutPolicy("{}".to_string()));
    }

    #[test]
    fn invalid_desired_policy_is_validation_error() {
        let mut spec = desired();
        spec.policy = Some("{".to_string());
        assert_eq!(
            field_of(diff(&key(), &spec, Some(&observed())).unwrap_err()).as_deref(),
            Some("spec.policy")
        );
    }

    #[test]
    fn tags_untag_before_tag_and_skip_system_tags() {
        let mut spec = desired();
        spec.tags = BTreeMap::from([
            ("team".to_string(), "platform".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        let mut obs = observed();
        obs.tags.insert("stale".to_string(), "x".to_string());

        let ops = diff(&key(), &spec, Some(&obs)).unwrap();
        assert_eq!(
            ops.iter().map(|o| o.kind.clone()).collect::<Vec<_>>(),
            vec![
                OperationKind::UntagResource(vec!["stale".to_string()]),
                OperationKind::TagResource(BTreeMap::from([
                    ("env".to_string(), "prod".to_string()),
                    ("team".to_string(), "platform".to_string()),
                ])),
            ]
        );
    }

    #[test]
    fn policy_operations_precede_tag_operations() {
        let mut spec = desired();
        spec.policy = Some("{}".to_string());
        spec.tags.insert("env".to_string(), "prod".to_string());
        let names: Vec<_> = diff(&key(), &spec, Some(&observed()))
            .unwrap()
            .iter()
            .map(|o| o.name())
            .collect();
        assert_eq!(names, vec!["put_policy", "tag_resource"]);
    }

    #[test]
    fn canonicalize_collapses_and_sorts_arrays() {
        let a = canonicalize(serde_json::json!({"x": ["b", "a", "a"], "y": ["only"]}));
        let b = canonicalize(serde_json::json!({"y": "only", "x": ["a", "b"]}));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn replaying_operations_leaves_state_unchanged() {
        let gateway = MemoryGateway::new();
        let mut spec = desired();
        spec.policy = Some("{}".to_string());

        let create = Operation::create(&spec);
        let first = create.execute(&gateway).await.unwrap().unwrap();
        let after_first = gateway.get(&first.key).unwrap();

        // A replayed create conflicts without touching the existing access point
        let second = create.execute(&gateway).await.unwrap_err();
        assert!(matches!(second, GatewayError::Conflict(_)));
        assert_eq!(gateway.get(&first.key).unwrap(), after_first);

        let tag = Operation {
            key: first.key.clone(),
            kind: OperationKind::TagResource(BTreeMap::from([(
                "env".to_string(),
                "prod".to_string(),
            )])),
        };
        tag.execute(&gateway).await.unwrap();
        let tagged = gateway.get(&first.key).unwrap();
        tag.execute(&gateway).await.unwrap();
        assert_eq!(gateway.get(&first.key).unwrap(), tagged);

        let delete = Operation::delete(first.key.clone());
        assert_eq!(delete.execute(&gateway).await, Ok(None));
        assert_eq!(delete.execute(&gateway).await, Ok(None));
        assert!(!gateway.exists(&first.key));
    }

    #[test]
    fn matching_access_point_is_adoptable() {
        let identity = adopt(&key(), &desired(), &observed()).unwrap();
        assert_eq!(identity.key, key());
        assert_eq!(identity.arn, Some(key().arn("us-west-2")));
        assert_eq!(identity.alias.as_deref(), Some("ap-test-1-abc-s3alias"));
    }

    #[test]
    fn access_point_on_another_bucket_is_not_adoptable() {
        let mut foreign = observed();
        foreign.bucket = "someone-elses-bucket".to_string();
        let err = adopt(&key(), &desired(), &foreign).unwrap_err();
        assert_eq!(field_of(err), Some("spec.bucket".to_string()));
    }

    #[test]
    fn access_point_in_another_vpc_is_not_adoptable() {
        let mut foreign = observed();
        foreign.vpc_configuration = Some(VpcConfiguration {
            vpc_id: "vpc-0a1b2c3d".to_string(),
        });
        let err = adopt(&key(), &desired(), &foreign).unwrap_err();
        assert_eq!(field_of(err), Some("spec.vpcConfiguration".to_string()));
    }

    #[tokio::test]
    async fn non_conflict_create_failures_propagate() {
        let gateway = MemoryGateway::new();
        gateway.inject_fault(
            crate::gateway::memory::GatewayCall::Create,
            GatewayError::Throttled,
        );
        let err = Operation::create(&desired())
            .execute(&gateway)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Throttled);
    }
}
