pub mod exporter;
pub mod facade;
pub mod line_protocol;
pub mod log_sink;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

pub use exporter::{HttpTransport, TimeSeriesExporter, Transport};
pub use facade::MetricsFacade;
pub use line_protocol::Point;
pub use log_sink::LogSink;

/// Where in the call graph a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    /// Middleware or sub-router: synchronous time inside the call
    Layer,
    /// Route handler: time until headers start going out
    Route,
}

impl Zone {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Layer => "layer",
            Self::Route => "route",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single latency observation produced by a probe.
/// Handed to the sinks immediately and not kept afterwards.
#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub zone: Zone,
    /// e.g. "GET./users" or "auth-middleware.handle"
    pub label: String,
    pub duration_ms: u64,
}

impl Sample {
    pub fn now(zone: Zone, label: &str, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            zone,
            label: label.to_string(),
            duration_ms,
        }
    }

    /// `<ISO8601> <ms>ms <zone>/<label>`
    pub fn log_line(&self) -> String {
        format!(
            "{} {}ms {}/{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.duration_ms,
            self.zone,
            self.label
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_line_format() {
        let sample = Sample {
            timestamp: Utc.with_ymd_and_hms(2017, 3, 4, 10, 20, 30).unwrap(),
            zone: Zone::Route,
            label: "GET./".into(),
            duration_ms: 12,
        };
        assert_eq!(sample.log_line(), "2017-03-04T10:20:30.000Z 12ms route/GET./");
    }
}
