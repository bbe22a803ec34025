//! loadgrid-replay — timestamp-faithful batch replay.
//!
//! A submitted batch carries jobs with recorded offsets from batch start.
//! The scheduler injects each job into the dispatch pipeline when its
//! offset elapses (never earlier; late jobs go out back to back), records
//! every terminal job to a per-batch result CSV, and drives the
//! autoscaler's start/stop and per-job hooks. One batch replays at a
//! time; a submission while one is active is rejected.

mod recorder;
pub mod scheduler;

pub use scheduler::{BatchStatus, ReplayScheduler};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Another batch is replaying; only one runs at a time.
    #[error("batch '{active}' is already replaying")]
    AlreadyActive { active: String },

    #[error("batch contains no jobs")]
    EmptyBatch,

    #[error("failed to create result file")]
    Io(#[from] std::io::Error),

    #[error("failed to start control loop")]
    ControlLoop(#[source] anyhow::Error),
}
