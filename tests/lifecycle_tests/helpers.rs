//! Shared setup for lifecycle tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use s3control_operator::config::ControllerConfig;
use s3control_operator::controller::{Controller, ControllerHandle};
use s3control_operator::crd::{AccessPoint, AccessPointKey, AccessPointSpec};
use s3control_operator::gateway::memory::MemoryGateway;
use s3control_operator::retry::BackoffConfig;
use s3control_operator::store::RecordKey;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(10);

pub const ACCOUNT: &str = "123456789012";

/// Config with short intervals so stories finish quickly
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: 0.0,
        },
        call_timeout: Duration::from_secs(2),
        creation_deadline: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        resync_interval: Duration::from_millis(100),
        max_delete_attempts: 5,
        workers: 4,
        ..Default::default()
    }
}

pub fn start(gateway: &Arc<MemoryGateway>, config: ControllerConfig) -> ControllerHandle {
    Controller::new(gateway.clone(), config).start()
}

pub fn spec(name: &str) -> AccessPointSpec {
    AccessPointSpec {
        name: name.to_string(),
        account_id: ACCOUNT.to_string(),
        bucket: "bootstrap-bucket".to_string(),
        bucket_account_id: None,
        vpc_configuration: None,
        public_access_block_configuration: None,
        policy: None,
        tags: BTreeMap::new(),
    }
}

pub fn access_point(name: &str) -> AccessPoint {
    access_point_with(name, spec(name))
}

pub fn access_point_with(name: &str, spec: AccessPointSpec) -> AccessPoint {
    let mut ap = AccessPoint::new(name, spec);
    ap.metadata.namespace = Some("default".to_string());
    ap
}

pub fn record_key(name: &str) -> RecordKey {
    RecordKey::new("default", name)
}

pub fn ap_key(name: &str) -> AccessPointKey {
    AccessPointKey::new(ACCOUNT, name)
}
