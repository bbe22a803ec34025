//! External metrics publication.
//!
//! `MetricsSink` mirrors every internal write to an external aggregator.
//! `StatsdSink` speaks the statsd line protocol over UDP (fire-and-forget;
//! a lost datagram is never an error), `NoopSink` stands in when no agent
//! is configured.

use std::net::UdpSocket;
use std::time::Duration;

use tracing::debug;

use crate::keys::Metric;

/// One metric tag, rendered as `name:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Destination for externally published metrics.
pub trait MetricsSink: Send + Sync {
    fn count(&self, metric: &Metric, tags: &[Label]);
    fn gauge(&self, metric: &Metric, value: f64, tags: &[Label]);
    fn time(&self, metric: &Metric, value: Duration, tags: &[Label]);
}

/// Sink that drops everything.
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn count(&self, _metric: &Metric, _tags: &[Label]) {}
    fn gauge(&self, _metric: &Metric, _value: f64, _tags: &[Label]) {}
    fn time(&self, _metric: &Metric, _value: Duration, _tags: &[Label]) {}
}

/// statsd line-protocol sink.
pub struct StatsdSink {
    socket: UdpSocket,
}

impl StatsdSink {
    /// Bind an ephemeral local socket and connect it to the agent address.
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Ok(Self { socket })
    }

    fn emit(&self, line: &str) {
        if let Err(e) = self.socket.send(line.as_bytes()) {
            debug!(error = %e, "statsd send failed");
        }
    }
}

impl MetricsSink for StatsdSink {
    fn count(&self, metric: &Metric, tags: &[Label]) {
        self.emit(&render(metric.name, "1", "c", tags));
    }

    fn gauge(&self, metric: &Metric, value: f64, tags: &[Label]) {
        self.emit(&render(metric.name, &format!("{value}"), "g", tags));
    }

    fn time(&self, metric: &Metric, value: Duration, tags: &[Label]) {
        self.emit(&render(metric.name, &format!("{}", value.as_millis()), "ms", tags));
    }
}

fn render(name: &str, value: &str, kind: &str, tags: &[Label]) -> String {
    let mut line = format!("{name}:{value}|{kind}");
    if !tags.is_empty() {
        line.push_str("|#");
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&tag.name);
            line.push(':');
            line.push_str(&tag.value);
        }
    }
    line
}
