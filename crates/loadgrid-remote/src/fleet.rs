//! Fleet dashboard and forecaster clients.
//!
//! The dashboard exposes the serve-application tree (replica states and
//! deployment config) and accepts a PUT of the same shape to resize; the
//! forecaster is a separate service returning a worker-count target for a
//! series of observation windows.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use loadgrid_autoscale::{BoxFuture, FleetControl, ForecastPoint, WorkerCounts};

use crate::RemoteError;
use crate::client::HttpClient;

const APP_NAME: &str = "text2img";
const DEPLOYMENT_NAME: &str = "image_service";
const IMPORT_PATH: &str = "core.image_service:entrypoint";

// ── Dashboard wire schema ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApplicationsResponse {
    #[serde(default)]
    applications: HashMap<String, Application>,
}

#[derive(Debug, Deserialize)]
struct Application {
    #[serde(default)]
    deployments: HashMap<String, Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(default)]
    replicas: Vec<Replica>,
    #[serde(default)]
    deployment_config: Option<DeploymentConfig>,
}

#[derive(Debug, Deserialize)]
struct Replica {
    #[serde(default)]
    state: String,
}

/// Deployment config round-trips through the resize PUT; fields we do not
/// model are preserved verbatim.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DeploymentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    autoscaling_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_replicas: Option<u32>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

// ── Forecaster wire schema ───────────────────────────────────────

#[derive(Debug, Serialize)]
struct ForecastRequest {
    points: Vec<ForecastPoint>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    count: u32,
}

/// `FleetControl` backed by the fleet dashboard and forecaster HTTP APIs.
#[derive(Clone)]
pub struct FleetApi {
    client: HttpClient,
    fleet_addr: String,
    forecast_addr: String,
}

impl FleetApi {
    pub fn new(
        fleet_addr: impl Into<String>,
        forecast_addr: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: HttpClient::new(timeout),
            fleet_addr: fleet_addr.into(),
            forecast_addr: forecast_addr.into(),
        }
    }

    async fn fetch_applications(&self) -> Result<ApplicationsResponse, RemoteError> {
        let resp = self.client.get(&self.fleet_addr, "/api/serve/applications/").await?;
        if !resp.status.is_success() {
            return Err(RemoteError::Status {
                status: resp.status,
                uri: format!("http://{}/api/serve/applications/", self.fleet_addr),
            });
        }
        serde_json::from_slice(&resp.body)
            .map_err(|e| RemoteError::Schema(format!("applications response: {e}")))
    }

    async fn worker_counts_call(self) -> Result<WorkerCounts, RemoteError> {
        let apps = self.fetch_applications().await?;
        count_workers(&apps)
    }

    async fn forecast_call(
        self,
        elapsed_secs: u64,
        points: Vec<ForecastPoint>,
    ) -> Result<u32, RemoteError> {
        let resp = self
            .client
            .post_json(
                &self.forecast_addr,
                "/autoscaler/calc",
                &ForecastRequest { points },
            )
            .await?;
        if !resp.status.is_success() {
            return Err(RemoteError::Status {
                status: resp.status,
                uri: format!("http://{}/autoscaler/calc", self.forecast_addr),
            });
        }
        let parsed: ForecastResponse = serde_json::from_slice(&resp.body)
            .map_err(|e| RemoteError::Schema(format!("forecast response: {e}")))?;
        debug!(elapsed_secs, target = parsed.count, "forecast received");
        Ok(parsed.count)
    }

    async fn resize_call(self, workers: u32) -> Result<(), RemoteError> {
        let apps = self.fetch_applications().await?;
        let payload = resize_payload(apps, workers)?;
        let resp = self
            .client
            .put_json(&self.fleet_addr, "/api/serve/applications/", &payload)
            .await?;
        if !resp.status.is_success() {
            return Err(RemoteError::Status {
                status: resp.status,
                uri: format!("http://{}/api/serve/applications/", self.fleet_addr),
            });
        }
        Ok(())
    }
}

impl FleetControl for FleetApi {
    fn worker_counts(&self) -> BoxFuture<anyhow::Result<WorkerCounts>> {
        let this = self.clone();
        Box::pin(async move { this.worker_counts_call().await.map_err(anyhow::Error::from) })
    }

    fn forecast(
        &self,
        elapsed_secs: u64,
        points: Vec<ForecastPoint>,
    ) -> BoxFuture<anyhow::Result<u32>> {
        let this = self.clone();
        Box::pin(async move {
            this.forecast_call(elapsed_secs, points)
                .await
                .map_err(anyhow::Error::from)
        })
    }

    fn resize(&self, workers: u32) -> BoxFuture<anyhow::Result<()>> {
        let this = self.clone();
        Box::pin(async move { this.resize_call(workers).await.map_err(anyhow::Error::from) })
    }
}

fn find_deployment(apps: &ApplicationsResponse) -> Result<&Deployment, RemoteError> {
    apps.applications
        .get(APP_NAME)
        .ok_or_else(|| RemoteError::Schema(format!("application '{APP_NAME}' not found")))?
        .deployments
        .get(DEPLOYMENT_NAME)
        .ok_or_else(|| RemoteError::Schema(format!("deployment '{DEPLOYMENT_NAME}' not found")))
}

fn count_workers(apps: &ApplicationsResponse) -> Result<WorkerCounts, RemoteError> {
    let deployment = find_deployment(apps)?;
    let total = deployment.replicas.len() as u32;
    let running = deployment
        .replicas
        .iter()
        .filter(|r| r.state == "RUNNING")
        .count() as u32;
    Ok(WorkerCounts { running, total })
}

/// Build the resize PUT body: the current deployment config with
/// `num_replicas` set. Refused when the remote side runs its own
/// autoscaler, which owns the replica count.
fn resize_payload(
    mut apps: ApplicationsResponse,
    workers: u32,
) -> Result<serde_json::Value, RemoteError> {
    let deployment = apps
        .applications
        .get_mut(APP_NAME)
        .ok_or_else(|| RemoteError::Schema(format!("application '{APP_NAME}' not found")))?
        .deployments
        .remove(DEPLOYMENT_NAME)
        .ok_or_else(|| RemoteError::Schema(format!("deployment '{DEPLOYMENT_NAME}' not found")))?;

    let mut config = deployment.deployment_config.unwrap_or_default();
    if config.autoscaling_config.is_some() {
        return Err(RemoteError::ExternalAutoscaler);
    }
    config.num_replicas = Some(workers);

    Ok(serde_json::json!({
        "applications": [{
            "name": APP_NAME,
            "import_path": IMPORT_PATH,
            "deployments": [{
                "name": DEPLOYMENT_NAME,
                "deployment_config": config,
            }],
        }],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard_json(with_autoscaler: bool) -> String {
        let autoscaling = if with_autoscaler {
            r#""autoscaling_config": {"min_replicas": 1},"#
        } else {
            ""
        };
        format!(
            r#"{{
                "applications": {{
                    "text2img": {{
                        "deployments": {{
                            "image_service": {{
                                "replicas": [
                                    {{"state": "RUNNING"}},
                                    {{"state": "RUNNING"}},
                                    {{"state": "STARTING"}}
                                ],
                                "deployment_config": {{
                                    {autoscaling}
                                    "max_ongoing_requests": 4
                                }}
                            }}
                        }}
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn counts_running_and_total_replicas() {
        let apps: ApplicationsResponse = serde_json::from_str(&dashboard_json(false)).unwrap();
        let counts = count_workers(&apps).unwrap();
        assert_eq!(counts.running, 2);
        assert_eq!(counts.total, 3);
    }

    #[test]
    fn missing_application_is_a_schema_error() {
        let apps: ApplicationsResponse = serde_json::from_str(r#"{"applications": {}}"#).unwrap();
        assert!(matches!(count_workers(&apps), Err(RemoteError::Schema(_))));
    }

    #[test]
    fn resize_sets_replicas_and_keeps_unknown_fields() {
        let apps: ApplicationsResponse = serde_json::from_str(&dashboard_json(false)).unwrap();
        let payload = resize_payload(apps, 5).unwrap();

        let config = &payload["applications"][0]["deployments"][0]["deployment_config"];
        assert_eq!(config["num_replicas"], 5);
        assert_eq!(config["max_ongoing_requests"], 4);
        assert_eq!(payload["applications"][0]["name"], "text2img");
    }

    #[test]
    fn resize_refused_under_external_autoscaler() {
        let apps: ApplicationsResponse = serde_json::from_str(&dashboard_json(true)).unwrap();
        assert!(matches!(
            resize_payload(apps, 5),
            Err(RemoteError::ExternalAutoscaler)
        ));
    }

    #[test]
    fn forecast_request_wire_shape() {
        let req = ForecastRequest {
            points: vec![ForecastPoint {
                running_worker: 2,
                new_job: 10,
                ongoing_job: 4,
                completed_job: 8,
                avg_duration_ms: 1500.0,
                avg_delay_ms: 2000.0,
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["points"][0]["active_workers"], 2);
        assert_eq!(json["points"][0]["num_new_tasks"], 10);
        assert_eq!(json["points"][0]["avg_delay"], 2000.0);
    }

    #[test]
    fn forecast_response_decodes_count() {
        let parsed: ForecastResponse = serde_json::from_str(r#"{"count": 7}"#).unwrap();
        assert_eq!(parsed.count, 7);
    }
}
