//! s3control-operator - reconciliation core for S3 Control AccessPoint resources
//!
//! The controller drives each AccessPoint record through a create, observe,
//! update and delete loop against the S3 Control API until the observed state
//! matches the desired spec.
//!
//! # Modules
//!
//! - [`crd`] - AccessPoint Custom Resource Definition
//! - [`gateway`] - S3 Control client contract and in-memory simulator
//! - [`diff`] - Desired/observed comparison producing operations
//! - [`controller`] - Reconcile state machine and worker runtime
//! - [`finalizer`] - Finalizer bookkeeping gating record removal
//! - [`status`] - Conditions and reasons reported on records
//! - [`store`] - Per-key serialized record store
//! - [`server`] - HTTP status API
//! - [`config`] - Controller configuration
//! - [`retry`] - Backoff and condition polling
//! - [`telemetry`] - Tracing setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod error;
pub mod finalizer;
pub mod gateway;
pub mod retry;
pub mod server;
pub mod status;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace used for records applied without one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default address for the status API
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Region used to build ARNs when none is configured
pub const DEFAULT_REGION: &str = "us-west-2";
