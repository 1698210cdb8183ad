use std::sync::Arc;

use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::instrument::{ScanOptions, Scanner};
use crate::metrics::{LogSink, MetricsFacade, TimeSeriesExporter, Transport};
use crate::router::Router;

/// A monitor attached to one application router. Owns the log sink, the
/// exporter and the periodic scanner; dropping it stops the scanner.
pub struct Monitor {
    config: MonitorConfig,
    metrics: Arc<MetricsFacade>,
    scanner: Scanner,
}

impl Monitor {
    /// Attach to `router` using the HTTP exporter when `influxDB` is set.
    /// Must be called from inside a tokio runtime.
    pub fn attach(router: &Router, config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        let exporter = match &config.influx_db {
            Some(influx) => Some(TimeSeriesExporter::spawn(influx, &config.server_name)?),
            None => None,
        };
        Self::assemble(router, config, exporter)
    }

    /// Same as [`Monitor::attach`], posting batches through `transport`.
    pub fn attach_with_transport(
        router: &Router,
        config: MonitorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let exporter = match &config.influx_db {
            Some(influx) => Some(TimeSeriesExporter::with_transport(
                influx,
                &config.server_name,
                transport,
            )?),
            None => None,
        };
        Self::assemble(router, config, exporter)
    }

    fn assemble(
        router: &Router,
        config: MonitorConfig,
        exporter: Option<Arc<TimeSeriesExporter>>,
    ) -> Result<Self, MonitorError> {
        let log = if config.log_file {
            Some(LogSink::open(config.log_path())?)
        } else {
            None
        };
        let metrics = Arc::new(MetricsFacade::new(log, exporter));

        let options = ScanOptions {
            stat_handle: config.stat_handle,
            stat_router: config.stat_router,
        };
        let scanner = Scanner::spawn(
            router.stack(),
            options,
            metrics.clone(),
            config.scan_delay(),
            config.scan_interval(),
        )?;

        info!(
            server = %config.server_name,
            log = config.log_file,
            export = config.influx_db.is_some(),
            "monitor attached"
        );

        Ok(Self {
            config,
            metrics,
            scanner,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsFacade> {
        &self.metrics
    }

    pub fn exporter(&self) -> Option<&Arc<TimeSeriesExporter>> {
        self.metrics.exporter()
    }

    /// Instrument whatever the timer has not reached yet.
    pub fn scan_now(&self) -> usize {
        self.scanner.scan_now()
    }

    /// Reopen the sample log at its configured path.
    pub fn rotate_log(&self) -> Result<(), MonitorError> {
        info!("rotating sample log");
        self.metrics.rotate_log()
    }

    /// Stop scanning and exporting. Probes already installed keep
    /// forwarding calls; their samples still reach the log.
    pub async fn shutdown(&self) {
        self.scanner.stop();
        if let Some(exporter) = self.metrics.exporter() {
            exporter.shutdown().await;
        }
        if let Some(log) = self.metrics.log() {
            if let Err(e) = log.flush() {
                warn!(error = %e, "sample log flush failed");
            }
        }
    }
}

/// Rotate the sample log every time the process receives SIGHUP.
#[cfg(unix)]
pub fn rotate_on_hangup(
    monitor: Arc<Monitor>,
) -> Result<tokio::task::JoinHandle<()>, MonitorError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).map_err(MonitorError::Signal)?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            if let Err(e) = monitor.rotate_log() {
                warn!(error = %e, "log rotation failed");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfluxConfig;
    use crate::metrics::exporter::tests::RecordingTransport;
    use crate::router::{Request, Response};
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> MonitorConfig {
        MonitorConfig {
            path: dir.to_path_buf(),
            ..MonitorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attach_without_exporter() {
        let dir = tempfile::tempdir().unwrap();
        let app = Router::new();
        app.get("/", |_req, res, _next| {
            res.send("ok");
            Ok(())
        });

        let monitor = Monitor::attach(&app, config(dir.path())).unwrap();
        assert!(monitor.exporter().is_none());
        assert_eq!(monitor.scan_now(), 1);

        app.handle(&Request::new("GET", "/"), &Response::new()).unwrap();
        monitor.shutdown().await;

        let log = std::fs::read_to_string(monitor.config().log_path()).unwrap();
        assert!(log.trim_end().ends_with("ms route/GET./"), "{log}");
    }

    #[tokio::test(start_paused = true)]
    async fn log_file_disabled_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let app = Router::new();
        let mut cfg = config(dir.path());
        cfg.log_file = false;

        let monitor = Monitor::attach(&app, cfg).unwrap();
        assert!(monitor.metrics().log().is_none());
        assert!(monitor.rotate_log().is_ok());
        assert!(!monitor.config().log_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected() {
        let app = Router::new();
        let mut cfg = MonitorConfig::default();
        cfg.log_file = false;
        cfg.influx_db = Some(InfluxConfig::new("", "monitor"));
        assert!(matches!(
            Monitor::attach(&app, cfg),
            Err(MonitorError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn samples_flow_to_exporter() {
        let dir = tempfile::tempdir().unwrap();
        let app = Router::new();
        app.get("/", |_req, res, _next| {
            res.send("ok");
            Ok(())
        });

        let mut influx = InfluxConfig::new("http://collector", "monitor");
        influx.heartbeat = false;
        let mut cfg = config(dir.path());
        cfg.influx_db = Some(influx);

        let transport = Arc::new(RecordingTransport::default());
        let monitor = Monitor::attach_with_transport(&app, cfg, transport.clone()).unwrap();

        // First timed scan runs after the default one-second delay.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        app.handle(&Request::new("GET", "/"), &Response::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let posts = transport.payloads();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].starts_with("function,server=root,zone=route,rail=GET./ value=0 "));
        monitor.shutdown().await;
    }
}
