//! Backoff and condition polling.
//!
//! The engine never sleeps inside a reconcile pass. Failed steps are requeued
//! after [`BackoffConfig::delay_for_attempt`], and callers that need to wait
//! for an outcome poll with [`wait_for`] instead of fixed sleeps.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_ms;
use crate::Error;

/// Exponential backoff with jitter.
///
/// The delay for attempt `n` (1-based) is
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`, then scaled by a
/// random factor in `[1 - jitter, 1 + jitter]` and capped again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(rename = "initialDelayMs", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any delay
    #[serde(rename = "maxDelayMs", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
    /// Fraction of the delay to randomize, between 0.0 and 1.0
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    /// Backoff without randomization, for deterministic schedules
    pub fn without_jitter(self) -> Self {
        Self { jitter: 0.0, ..self }
    }

    /// Delay to wait before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let max = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)).min(max);

        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };

        Duration::from_secs_f64((base * factor).clamp(0.0, max))
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), Error> {
        if self.initial_delay.is_zero() {
            return Err(Error::config("backoff.initialDelayMs must be greater than 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::config(
                "backoff.maxDelayMs must not be smaller than backoff.initialDelayMs",
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(Error::config("backoff.multiplier must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::config("backoff.jitter must be between 0.0 and 1.0"));
        }
        Ok(())
    }
}

/// Poll `condition` every `poll` until it returns `Some`, or fail after `timeout`.
///
/// `what` names the awaited condition in logs and in the timeout error.
pub async fn wait_for<F, Fut, T>(
    timeout: Duration,
    poll: Duration,
    what: &str,
    mut condition: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = condition().await {
            debug!(condition = %what, attempt, "condition met");
            return Ok(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::deadline_exceeded(what, timeout));
        }
        tokio::time::sleep(poll).await;
    }
}
