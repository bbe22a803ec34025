//! Job — one unit of replayed work.
//!
//! A `JobSpec` is what a batch submission carries: the identifier, the
//! generation parameters, and the recorded offset from batch start at which
//! the job must be injected. A `Job` is the mutable in-flight form the
//! pipeline owns: `request_time` is overwritten with the actual injection
//! wall clock, and workers fill in retries, start/end times, and success.

use serde::{Deserialize, Serialize};

/// Parameters forwarded verbatim to the remote generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub prompt: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler_index: String,
    pub width: u32,
    pub height: u32,
}

/// One entry of a submitted batch: identifier, payload, and the relative
/// moment (ms from batch start) it was recorded at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub params: GenerateParams,
    pub offset_ms: u64,
}

/// A job in flight through the dispatch pipeline.
///
/// All timestamps are epoch milliseconds; zero means "not yet set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub params: GenerateParams,
    pub retry: u32,
    /// Wall clock at the moment the job was handed to the pipeline.
    pub request_time: i64,
    /// Wall clock when a worker picked the job up.
    pub start_time: i64,
    /// Wall clock when the job reached a terminal state.
    pub end_time: i64,
    pub success: bool,
}

impl Job {
    pub fn new(id: impl Into<String>, params: GenerateParams) -> Self {
        Self {
            id: id.into(),
            params,
            retry: 0,
            request_time: 0,
            start_time: 0,
            end_time: 0,
            success: false,
        }
    }

    /// Wall-clock processing time (start → end) in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// End-to-end latency (injection → end) in milliseconds.
    pub fn latency_ms(&self) -> i64 {
        self.end_time - self.request_time
    }
}

impl From<JobSpec> for Job {
    fn from(spec: JobSpec) -> Self {
        Job::new(spec.id, spec.params)
    }
}
