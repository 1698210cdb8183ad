use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::MonitorError;

/// Fixed file name of the local sample log, created under `path`.
pub const LOG_FILE_NAME: &str = "router-monitor.log";

// ─── Top-level options ───────────────────────────────────────────

/// Monitor options. Every key is optional; missing keys fall back to
/// the defaults below. Immutable once the monitor is attached.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Directory holding the log file (defaults to the working dir)
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Append one line per sample to the local log
    #[serde(default = "default_true")]
    pub log_file: bool,

    /// Probe middleware and sub-router nodes ("layer" zone)
    #[serde(default = "default_true")]
    pub stat_handle: bool,

    /// Probe route handlers ("route" zone)
    #[serde(default = "default_true")]
    pub stat_router: bool,

    /// Value of the `server` tag on every exported point
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Time-series export; `None` disables exporting entirely
    #[serde(default, rename = "influxDB")]
    pub influx_db: Option<InfluxConfig>,

    /// Delay before the first scan of the routing tree (ms)
    #[serde(default = "default_scan_delay")]
    pub scan_delay: u64,

    /// Period between subsequent scans (ms)
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
}

// ─── Exporter options ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluxConfig {
    /// Base URL of the collector, e.g. `http://localhost:8086`
    pub url: String,

    /// Target database name
    pub db: String,

    /// Maximum points per POST
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,

    /// Emit a liveness point on a fixed cadence
    #[serde(default = "default_true")]
    pub heartbeat: bool,

    /// Heartbeat cadence (ms)
    #[serde(default = "default_heartbeat_timer")]
    pub heartbeat_timer: u64,

    /// Debounce between an enqueue and the flush it schedules (ms)
    #[serde(default = "default_flush_delay")]
    pub flush_delay: u64,

    /// Queue cap; the oldest points are dropped beyond it
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
fn default_true() -> bool {
    true
}
fn default_server_name() -> String {
    "root".into()
}
fn default_scan_delay() -> u64 {
    1_000
}
fn default_scan_interval() -> u64 {
    60_000
}
fn default_concurrent() -> usize {
    1_000
}
fn default_heartbeat_timer() -> u64 {
    1_000
}
fn default_flush_delay() -> u64 {
    1_000
}
fn default_max_pending() -> usize {
    100_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            log_file: true,
            stat_handle: true,
            stat_router: true,
            server_name: default_server_name(),
            influx_db: None,
            scan_delay: default_scan_delay(),
            scan_interval: default_scan_interval(),
        }
    }
}

impl MonitorConfig {
    /// Load options from a JSON document on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MonitorError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.scan_interval == 0 {
            return Err(MonitorError::Config("scanInterval must be > 0".into()));
        }
        if self.server_name.trim().is_empty() {
            return Err(MonitorError::Config("serverName must not be empty".into()));
        }
        if let Some(influx) = &self.influx_db {
            influx.validate()?;
        }
        Ok(())
    }

    /// Full path of the sample log.
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE_NAME)
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval)
    }
}

impl InfluxConfig {
    pub fn new(url: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db: db.into(),
            concurrent: default_concurrent(),
            heartbeat: true,
            heartbeat_timer: default_heartbeat_timer(),
            flush_delay: default_flush_delay(),
            max_pending: default_max_pending(),
        }
    }

    fn validate(&self) -> Result<(), MonitorError> {
        if self.url.trim().is_empty() {
            return Err(MonitorError::Config("influxDB.url must not be empty".into()));
        }
        if self.db.trim().is_empty() {
            return Err(MonitorError::Config("influxDB.db must not be empty".into()));
        }
        if self.concurrent == 0 {
            return Err(MonitorError::Config("influxDB.concurrent must be > 0".into()));
        }
        if self.heartbeat && self.heartbeat_timer == 0 {
            return Err(MonitorError::Config(
                "influxDB.heartbeatTimer must be > 0".into(),
            ));
        }
        if self.max_pending < self.concurrent {
            return Err(MonitorError::Config(
                "influxDB.maxPending must be >= concurrent".into(),
            ));
        }
        Ok(())
    }

    /// `<url>/write` — the query string is attached by the transport.
    pub fn write_url(&self) -> String {
        format!("{}/write", self.url.trim_end_matches('/'))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timer)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert!(config.log_file);
        assert!(config.stat_handle);
        assert!(config.stat_router);
        assert_eq!(config.server_name, "root");
        assert!(config.influx_db.is_none());
        assert_eq!(config.scan_interval, 60_000);
        assert!(config.log_path().ends_with(LOG_FILE_NAME));
    }

    #[test]
    fn explicit_false_is_honored() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"logFile": false, "statHandle": false}"#).unwrap();
        assert!(!config.log_file);
        assert!(!config.stat_handle);
        assert!(config.stat_router);
    }

    #[test]
    fn influx_block_fills_defaults() {
        let config: MonitorConfig = serde_json::from_str(
            r#"{"serverName": "edge-1", "influxDB": {"url": "http://localhost:8086/", "db": "monitor"}}"#,
        )
        .unwrap();
        let influx = config.influx_db.as_ref().unwrap();
        assert_eq!(influx.concurrent, 1000);
        assert!(influx.heartbeat);
        assert_eq!(influx.heartbeat_timer, 1000);
        assert_eq!(influx.write_url(), "http://localhost:8086/write");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_zero_batch() {
        let mut config = MonitorConfig::default();
        let mut influx = InfluxConfig::new("http://localhost:8086", "monitor");
        influx.concurrent = 0;
        config.influx_db = Some(influx);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("monitor.json");
        std::fs::write(&file, r#"{"serverName": "api", "statRouter": false}"#).unwrap();

        let config = MonitorConfig::from_json_file(&file).unwrap();
        assert_eq!(config.server_name, "api");
        assert!(!config.stat_router);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = MonitorConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MonitorError::ConfigFile { .. }));
    }
}
