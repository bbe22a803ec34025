//! loadgrid.toml configuration parser.
//!
//! Every field has a default so a partial (or absent) file still yields a
//! runnable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub pipeline: PipelineConfig,
    pub replay: ReplayConfig,
    pub scaler: ScalerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Default generation endpoint, used before any fleet member is discovered.
    pub generate_endpoint: String,
    /// Base address of the external forecaster service.
    pub forecast_endpoint: String,
    /// Base address of the fleet dashboard (status + resize).
    pub fleet_endpoint: String,
    pub api_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_queue: usize,
    pub max_retry_queue: usize,
    pub max_retry: u32,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Directory receiving per-batch result and audit files.
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub metrics_window_secs: u64,
    pub forecast_window: usize,
    pub enable_autoscaling: bool,
    pub init_workers: u32,
    pub job_reward: f64,
    pub worker_cost_per_hour: f64,
    pub latency_threshold_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// statsd agent address (`host:port`); unset disables external publication.
    pub statsd_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            generate_endpoint: "image-service:8000".to_string(),
            forecast_endpoint: "forecaster:8000".to_string(),
            fleet_endpoint: "fleet-dashboard:8265".to_string(),
            api_timeout_secs: 3600,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue: 60_000,
            max_retry_queue: 1_000,
            max_retry: 1,
            shutdown_grace_secs: 2,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            output_dir: "/tmp/loadgrid/output".to_string(),
        }
    }
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            metrics_window_secs: 10,
            forecast_window: 6,
            enable_autoscaling: false,
            init_workers: 1,
            job_reward: 0.02,
            worker_cost_per_hour: 1.2,
            latency_threshold_ms: 60_000,
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file yields defaults with a warning.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file not readable, using defaults");
                Ok(Config::default())
            }
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.api_timeout_secs)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.scaler.metrics_window_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pipeline.shutdown_grace_secs)
    }
}
