//! In-memory S3 Control simulator
//!
//! Behaves like the S3 Control access point API closely enough to drive the
//! engine end to end: server-assigned ARN, alias and creation date, a
//! configurable number of fetches spent in `Creating`, request validation,
//! and scripted faults per call kind.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use super::{
    AccessPointGateway, AccessPointIdentity, GatewayError, NetworkOrigin, ObservedAccessPoint,
    ProvisioningStatus,
};
use crate::crd::{AccessPointKey, AccessPointSpec, AWS_TAG_PREFIX};
use crate::DEFAULT_REGION;

/// Gateway call kinds, used to script faults and count calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayCall {
    /// [`AccessPointGateway::fetch`]
    Fetch,
    /// [`AccessPointGateway::create`]
    Create,
    /// [`AccessPointGateway::put_policy`]
    PutPolicy,
    /// [`AccessPointGateway::delete_policy`]
    DeletePolicy,
    /// [`AccessPointGateway::tag_resource`]
    TagResource,
    /// [`AccessPointGateway::untag_resource`]
    UntagResource,
    /// [`AccessPointGateway::delete`]
    Delete,
}

struct StoredAccessPoint {
    observed: ObservedAccessPoint,
    /// Fetches left before a Creating access point reports Active
    pending_fetches: u32,
}

/// In-memory [`AccessPointGateway`]
pub struct MemoryGateway {
    region: String,
    activation_fetches: u32,
    access_points: DashMap<AccessPointKey, StoredAccessPoint>,
    faults: DashMap<GatewayCall, VecDeque<GatewayError>>,
    latency: DashMap<GatewayCall, Duration>,
    calls: DashMap<GatewayCall, u64>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Empty gateway where created access points are active immediately
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            activation_fetches: 0,
            access_points: DashMap::new(),
            faults: DashMap::new(),
            latency: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// Region used when building ARNs
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Number of fetches a new access point reports `Creating` before `Active`
    pub fn with_activation_fetches(mut self, fetches: u32) -> Self {
        self.activation_fetches = fetches;
        self
    }

    /// Fail the next call of `call` kind with `error`
    ///
    /// Faults queue up: injecting twice fails the next two calls.
    pub fn inject_fault(&self, call: GatewayCall, error: GatewayError) {
        self.faults.entry(call).or_default().push_back(error);
    }

    /// Delay every call of `call` kind by `delay` before it is served
    pub fn set_latency(&self, call: GatewayCall, delay: Duration) {
        self.latency.insert(call, delay);
    }

    /// Number of calls of `call` kind served so far, including failed ones
    pub fn call_count(&self, call: GatewayCall) -> u64 {
        self.calls.get(&call).map(|c| *c).unwrap_or(0)
    }

    /// Whether an access point with this key exists
    pub fn exists(&self, key: &AccessPointKey) -> bool {
        self.access_points.contains_key(key)
    }

    /// Current state of an access point, without counting as a fetch
    pub fn get(&self, key: &AccessPointKey) -> Option<ObservedAccessPoint> {
        self.access_points.get(key).map(|s| s.observed.clone())
    }

    /// Number of access points stored
    pub fn len(&self) -> usize {
        self.access_points.len()
    }

    /// Returns true if no access points are stored
    pub fn is_empty(&self) -> bool {
        self.access_points.is_empty()
    }

    /// Delete an access point behind the controller's back
    pub fn remove_out_of_band(&self, key: &AccessPointKey) -> bool {
        self.access_points.remove(key).is_some()
    }

    /// Force the provisioning status of an access point
    pub fn set_status(&self, key: &AccessPointKey, status: ProvisioningStatus) -> bool {
        match self.access_points.get_mut(key) {
            Some(mut stored) => {
                stored.observed.status = status;
                stored.pending_fetches = 0;
                true
            }
            None => false,
        }
    }

    /// Overwrite tags behind the controller's back
    pub fn set_tags_out_of_band(&self, key: &AccessPointKey, tags: BTreeMap<String, String>) {
        if let Some(mut stored) = self.access_points.get_mut(key) {
            stored.observed.tags = tags;
        }
    }

    /// Count the call, apply latency, then pop a scripted fault if any
    async fn enter(&self, call: GatewayCall) -> Result<(), GatewayError> {
        *self.calls.entry(call).or_insert(0) += 1;

        let delay = self.latency.get(&call).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = self
            .faults
            .get_mut(&call)
            .and_then(|mut queue| queue.pop_front());
        match fault {
            Some(error) => {
                debug!(?call, %error, "injected gateway fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn with_stored<T>(
        &self,
        key: &AccessPointKey,
        f: impl FnOnce(&mut StoredAccessPoint) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        match self.access_points.get_mut(key) {
            Some(mut stored) => f(&mut stored),
            None => Err(GatewayError::NotFound),
        }
    }

    fn alias_for(name: &str) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{name}-{suffix}-s3alias")
    }
}

fn check_key(key: &AccessPointKey) -> Result<(), GatewayError> {
    if key.name.is_empty() || key.account_id.len() != 12 {
        return Err(GatewayError::InvalidIdentity(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl AccessPointGateway for MemoryGateway {
    async fn fetch(&self, key: &AccessPointKey) -> Result<ObservedAccessPoint, GatewayError> {
        self.enter(GatewayCall::Fetch).await?;
        check_key(key)?;
        self.with_stored(key, |stored| {
            let observed = stored.observed.clone();
            if stored.pending_fetches > 0 {
                stored.pending_fetches -= 1;
                if stored.pending_fetches == 0 {
                    stored.observed.status = ProvisioningStatus::Active;
                }
            }
            Ok(observed)
        })
    }

    async fn create(&self, spec: &AccessPointSpec) -> Result<AccessPointIdentity, GatewayError> {
        self.enter(GatewayCall::Create).await?;
        spec.validate()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let key = spec.key();
        let entry = match self.access_points.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(GatewayError::Conflict(key.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let observed = ObservedAccessPoint {
            name: spec.name.clone(),
            account_id: spec.account_id.clone(),
            bucket: spec.bucket.clone(),
            bucket_account_id: spec
                .bucket_account_id
                .clone()
                .unwrap_or_else(|| spec.account_id.clone()),
            vpc_configuration: spec.vpc_configuration.clone(),
            public_access_block_configuration: spec.effective_public_access_block(),
            policy: spec.policy.clone(),
            tags: spec.tags.clone(),
            arn: key.arn(&self.region),
            alias: Self::alias_for(&spec.name),
            network_origin: if spec.vpc_configuration.is_some() {
                NetworkOrigin::Vpc
            } else {
                NetworkOrigin::Internet
            },
            creation_date: Utc::now(),
            status: if self.activation_fetches == 0 {
                ProvisioningStatus::Active
            } else {
                ProvisioningStatus::Creating
            },
        };
        let identity = observed.identity();

        entry.insert(StoredAccessPoint {
            observed,
            pending_fetches: self.activation_fetches,
        });
        debug!(access_point = %key, "created access point");
        Ok(identity)
    }

    async fn put_policy(&self, key: &AccessPointKey, document: &str) -> Result<(), GatewayError> {
        self.enter(GatewayCall::PutPolicy).await?;
        check_key(key)?;
        let parsed: serde_json::Value = serde_json::from_str(document)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed policy: {e}")))?;
        if !parsed.is_object() {
            return Err(GatewayError::InvalidRequest(
                "policy must be a JSON object".to_string(),
            ));
        }
        self.with_stored(key, |stored| {
            stored.observed.policy = Some(document.to_string());
            Ok(())
        })
    }

    async fn delete_policy(&self, key: &AccessPointKey) -> Result<(), GatewayError> {
        self.enter(GatewayCall::DeletePolicy).await?;
        check_key(key)?;
        self.with_stored(key, |stored| {
            stored.observed.policy = None;
            Ok(())
        })
    }

    async fn tag_resource(
        &self,
        key: &AccessPointKey,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        self.enter(GatewayCall::TagResource).await?;
        check_key(key)?;
        if let Some(reserved) = tags.keys().find(|k| k.starts_with(AWS_TAG_PREFIX)) {
            return Err(GatewayError::InvalidRequest(format!(
                "tag key '{reserved}' is reserved"
            )));
        }
        self.with_stored(key, |stored| {
            stored
                .observed
                .tags
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    async fn untag_resource(
        &self,
        key: &AccessPointKey,
        keys: &[String],
    ) -> Result<(), GatewayError> {
        self.enter(GatewayCall::UntagResource).await?;
        check_key(key)?;
        self.with_stored(key, |stored| {
            for tag in keys {
                stored.observed.tags.remove(tag);
            }
            Ok(())
        })
    }

    async fn delete(&self, key: &AccessPointKey) -> Result<(), GatewayError> {
        self.enter(GatewayCall::Delete).await?;
        check_key(key)?;
        match self.access_points.remove(key) {
            Some(_) => {
                debug!(access_point = %key, "deleted access point");
                Ok(())
            }
            None => Err(GatewayError::NotFound),
        }
    }
}
