//! Metric key registry.
//!
//! Each key is declared exactly once with its kind, so read routing is a
//! table lookup rather than a match on key strings.

/// How samples under a key aggregate on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Samples sum over the read window.
    Counter,
    /// The latest in-window sample wins.
    Gauge,
    /// In-window samples average (mean, in milliseconds).
    Timer,
}

/// A declared metric: name plus aggregation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
}

pub const JOB_REQUEST: Metric = Metric {
    name: "loadgrid.job_request",
    kind: MetricKind::Counter,
};
pub const JOB_SUCCESS: Metric = Metric {
    name: "loadgrid.job_success",
    kind: MetricKind::Counter,
};
pub const JOB_FAILURE: Metric = Metric {
    name: "loadgrid.job_failure",
    kind: MetricKind::Counter,
};
pub const JOB_DURATION: Metric = Metric {
    name: "loadgrid.job_duration",
    kind: MetricKind::Timer,
};
pub const JOB_LATENCY: Metric = Metric {
    name: "loadgrid.job_latency",
    kind: MetricKind::Timer,
};
pub const QUEUE_SIZE: Metric = Metric {
    name: "loadgrid.queue_size",
    kind: MetricKind::Gauge,
};
pub const WORKER_NUM: Metric = Metric {
    name: "loadgrid.worker_num",
    kind: MetricKind::Gauge,
};
pub const RUNNING_WORKER_NUM: Metric = Metric {
    name: "loadgrid.running_worker_num",
    kind: MetricKind::Gauge,
};
pub const EXPECTED_WORKER_NUM: Metric = Metric {
    name: "loadgrid.expected_worker_num",
    kind: MetricKind::Gauge,
};
pub const NODE_NUM: Metric = Metric {
    name: "loadgrid.node_num",
    kind: MetricKind::Gauge,
};

/// All declared metrics, in exposition order.
pub const REGISTRY: &[Metric] = &[
    JOB_REQUEST,
    JOB_SUCCESS,
    JOB_FAILURE,
    JOB_DURATION,
    JOB_LATENCY,
    QUEUE_SIZE,
    WORKER_NUM,
    RUNNING_WORKER_NUM,
    EXPECTED_WORKER_NUM,
    NODE_NUM,
];

/// Look up a declared metric by key name.
pub fn lookup(name: &str) -> Option<&'static Metric> {
    REGISTRY.iter().find(|m| m.name == name)
}
