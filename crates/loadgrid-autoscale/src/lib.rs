//! loadgrid-autoscale — the metrics-driven fleet control loop.
//!
//! The scaler observes the replay through two hooks (`pre_process_job` at
//! injection, `post_process_job` at completion), aggregates each metrics
//! window into a [`DataPoint`], tracks a cumulative reward, and drives the
//! external forecaster and fleet dashboard through the [`FleetControl`]
//! seam. Every step is appended to a per-batch audit CSV.

mod audit;
pub mod control;
pub mod scaler;

pub use control::{BoxFuture, FleetControl, ForecastPoint, WorkerCounts};
pub use scaler::{DataPoint, Scaler};
