//! loadgrid-metrics — observability for the replay pipeline and scaler.
//!
//! # Architecture
//!
//! ```text
//! MetricStore (in-memory, windowed)
//!   ├── count()/gauge()/time() ← workers, scaler hooks, report tick
//!   └── read_count()/read_gauge()/read_time() → step tick, metrics API
//!
//! MetricsSink (external publication)
//!   ├── StatsdSink → UDP datagrams to a statsd agent
//!   └── NoopSink  → used when no agent is configured
//! ```
//!
//! Every metric key is declared once in [`keys`] together with its kind
//! (counter, gauge, timer); generic reads route through that registry
//! instead of matching on key strings.

pub mod keys;
pub mod sink;
pub mod store;

pub use keys::{Metric, MetricKind};
pub use sink::{Label, MetricsSink, NoopSink, StatsdSink};
pub use store::MetricStore;
