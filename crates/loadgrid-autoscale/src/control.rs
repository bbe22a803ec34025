//! The remote fleet-control seam the scaler drives.

use serde::Serialize;

pub type BoxFuture<T> = std::pin::Pin<Box<dyn Future<Output = T> + Send>>;

/// Live worker counts as reported by the fleet dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCounts {
    /// Replicas in the RUNNING state.
    pub running: u32,
    /// All replicas, regardless of state.
    pub total: u32,
}

/// One observation window handed to the external forecaster.
///
/// Field names on the wire are the forecaster's, not ours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    #[serde(rename = "active_workers")]
    pub running_worker: u32,
    #[serde(rename = "num_new_tasks")]
    pub new_job: u64,
    #[serde(rename = "num_ongoing_tasks")]
    pub ongoing_job: i64,
    #[serde(rename = "num_completed_tasks")]
    pub completed_job: u64,
    #[serde(rename = "avg_duration")]
    pub avg_duration_ms: f64,
    #[serde(rename = "avg_delay")]
    pub avg_delay_ms: f64,
}

/// Operations the control loop performs against the outside world:
/// observe the fleet, ask the forecaster for a target, resize the fleet.
pub trait FleetControl: Send + Sync {
    fn worker_counts(&self) -> BoxFuture<anyhow::Result<WorkerCounts>>;

    /// Ask the external forecaster for the next worker count given the
    /// recent observation windows (oldest first).
    fn forecast(
        &self,
        elapsed_secs: u64,
        points: Vec<ForecastPoint>,
    ) -> BoxFuture<anyhow::Result<u32>>;

    fn resize(&self, workers: u32) -> BoxFuture<anyhow::Result<()>>;
}
