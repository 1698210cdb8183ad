use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{LogSink, Point, Sample, TimeSeriesExporter, Zone};
use crate::error::MonitorError;

/// Single entry point for probes. Fans each sample out to the local log
/// and/or the exporter; never blocks on I/O beyond a buffered append and
/// never returns an error to the probe.
pub struct MetricsFacade {
    log: Option<LogSink>,
    exporter: Option<Arc<TimeSeriesExporter>>,
    recorded: AtomicU64,
}

impl MetricsFacade {
    pub fn new(log: Option<LogSink>, exporter: Option<Arc<TimeSeriesExporter>>) -> Self {
        Self {
            log,
            exporter,
            recorded: AtomicU64::new(0),
        }
    }

    /// Record one observation.
    pub fn record(&self, zone: Zone, label: &str, duration_ms: u64) {
        let sample = Sample::now(zone, label, duration_ms);
        let line = sample.log_line();
        debug!(target: "router_monitor::sample", "{line}");

        if let Some(log) = &self.log {
            if let Err(e) = log.write(&line) {
                warn!(error = %e, "sample not written to log");
            }
        }
        if let Some(exporter) = &self.exporter {
            exporter.enqueue(Point::from(&sample));
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples recorded since start.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    pub fn log(&self) -> Option<&LogSink> {
        self.log.as_ref()
    }

    pub fn exporter(&self) -> Option<&Arc<TimeSeriesExporter>> {
        self.exporter.as_ref()
    }

    /// Reopen the log file. No-op when local logging is off.
    pub fn rotate_log(&self) -> Result<(), MonitorError> {
        match &self.log {
            Some(log) => log.rotate(),
            None => Ok(()),
        }
    }
}
