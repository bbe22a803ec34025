//! loadgrid-pipeline — the bounded dispatch/retry pipeline.
//!
//! ```text
//! ReplayScheduler ──submit()──▶ primary queue ─┐
//!                                              ├─▶ Worker (one per endpoint)
//!                              retry queue ◀───┤        │
//!                                 ▲            │        ▼
//!                                 └── transient failure │ success / terminal failure
//!                                                       ▼
//!                                              completion channel
//! ```
//!
//! Workers are keyed to discovered fleet endpoints: an added endpoint gets
//! a worker, a removed endpoint's worker is signalled to stop after its
//! in-flight job. Queue receivers are shared behind async mutexes, so no
//! two workers ever hold the same job.

pub mod backend;
pub mod dispatcher;
mod worker;

pub use backend::{BoxFuture, GenerateBackend};
pub use dispatcher::Dispatcher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline has been shut down; its queues no longer accept jobs.
    #[error("dispatch pipeline is stopped")]
    Stopped,
}
