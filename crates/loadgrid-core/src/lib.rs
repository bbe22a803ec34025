//! loadgrid-core — shared types and configuration for LoadGrid.
//!
//! Home of the value types every subsystem speaks: `Endpoint` (one fleet
//! member), `Job`/`JobSpec` (a unit of replayed work), `GenerateParams`
//! (the opaque payload for the remote generation call), and the TOML
//! process configuration.

pub mod config;
pub mod endpoint;
pub mod job;

pub use config::Config;
pub use endpoint::{Endpoint, EndpointParseError};
pub use job::{GenerateParams, Job, JobSpec};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
