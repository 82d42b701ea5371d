//! Controller configuration
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid configuration. Durations are written in milliseconds:
//!
//! ```yaml
//! callTimeoutMs: 10000
//! creationDeadlineMs: 300000
//! workers: 4
//! backoff:
//!   initialDelayMs: 500
//!   maxDelayMs: 60000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::BackoffConfig;
use crate::{Error, DEFAULT_REGION};

/// Tunables for the reconcile engine and runner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Backoff applied to failed steps
    pub backoff: BackoffConfig,
    /// Upper bound for a single gateway call
    #[serde(rename = "callTimeoutMs", with = "duration_ms")]
    pub call_timeout: Duration,
    /// How long an access point may stay in Creating
    #[serde(rename = "creationDeadlineMs", with = "duration_ms")]
    pub creation_deadline: Duration,
    /// Requeue interval while waiting for an access point to become active
    #[serde(rename = "pollIntervalMs", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Requeue interval for converged records
    #[serde(rename = "resyncIntervalMs", with = "duration_ms")]
    pub resync_interval: Duration,
    /// Consecutive delete failures before the record reports it
    pub max_delete_attempts: u32,
    /// Maximum reconciles running at once
    pub workers: usize,
    /// Region used for ARNs
    pub region: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            call_timeout: Duration::from_secs(10),
            creation_deadline: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            resync_interval: Duration::from_secs(600),
            max_delete_attempts: 5,
            workers: 4,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid config: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), Error> {
        self.backoff.validate()?;
        for (name, value) in [
            ("callTimeoutMs", self.call_timeout),
            ("creationDeadlineMs", self.creation_deadline),
            ("pollIntervalMs", self.poll_interval),
            ("resyncIntervalMs", self.resync_interval),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than 0")));
            }
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.max_delete_attempts == 0 {
            return Err(Error::config("maxDeleteAttempts must be at least 1"));
        }
        if self.region.is_empty() {
            return Err(Error::config("region must not be empty"));
        }
        Ok(())
    }
}

/// Serde helper storing a [`Duration`] as whole milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
