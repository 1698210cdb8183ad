//! Batched export of samples to a line-protocol collector.
//!
//! Samples are queued in memory. The first enqueue into an idle exporter
//! schedules a flush after `flush_delay`; each flush drains at most
//! `concurrent` points, posts them, and only once the post has resolved
//! sleeps again. An empty queue ends the loop until the next enqueue, so
//! at most one request is ever in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::line_protocol::{self, Point};
use crate::config::InfluxConfig;
use crate::error::MonitorError;

// ─── Transport ───────────────────────────────────────────────────

/// Delivers one serialized batch to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, payload: String) -> Result<(), MonitorError>;
}

/// `POST <url>/write?db=<db>&precision=ms`. No request timeout is set: a
/// hung collector holds back the next flush until it answers.
pub struct HttpTransport {
    client: reqwest::Client,
    write_url: String,
    db: String,
}

impl HttpTransport {
    pub fn new(config: &InfluxConfig) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("router-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            write_url: config.write_url(),
            db: config.db.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, payload: String) -> Result<(), MonitorError> {
        let response = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.db.as_str()), ("precision", "ms")])
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "collector responded");
        // Drain the body so the connection can be reused.
        let _ = response.bytes().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(MonitorError::Status(status.as_u16()))
        }
    }
}

// ─── Exporter ────────────────────────────────────────────────────

struct QueueState {
    pending: VecDeque<Point>,
    /// Batch whose post has not resolved yet
    in_flight: Vec<Point>,
    /// A flush loop is sleeping or posting
    flush_scheduled: bool,
    /// Points discarded because the queue was full
    dropped: u64,
    closed: bool,
}

pub struct TimeSeriesExporter {
    server_name: String,
    concurrent: usize,
    flush_delay: Duration,
    max_pending: usize,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    state: Mutex<QueueState>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl TimeSeriesExporter {
    /// Exporter posting over HTTP to the configured collector.
    pub fn spawn(config: &InfluxConfig, server_name: &str) -> Result<Arc<Self>, MonitorError> {
        let transport = Arc::new(HttpTransport::new(config)?);
        info!(
            url = %config.url,
            db = %config.db,
            concurrent = config.concurrent,
            "exporting samples to collector"
        );
        Self::with_transport(config, server_name, transport)
    }

    /// Exporter with a caller-supplied transport. Must be called from
    /// inside a tokio runtime; background tasks run on it.
    pub fn with_transport(
        config: &InfluxConfig,
        server_name: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, MonitorError> {
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let exporter = Arc::new(Self {
            server_name: server_name.to_string(),
            concurrent: config.concurrent.max(1),
            flush_delay: config.flush_delay(),
            max_pending: config.max_pending.max(config.concurrent),
            transport,
            runtime,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: Vec::new(),
                flush_scheduled: false,
                dropped: 0,
                closed: false,
            }),
            flush_task: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
        });

        if config.heartbeat {
            exporter.start_heartbeat(config.heartbeat_interval());
        }
        Ok(exporter)
    }

    /// Queue a point; schedules a flush if none is pending.
    pub fn enqueue(self: &Arc<Self>, point: Point) {
        let schedule = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.pending.len() >= self.max_pending {
                state.pending.pop_front();
                state.dropped += 1;
                if state.dropped.is_power_of_two() {
                    warn!(dropped = state.dropped, "export queue full; dropping oldest points");
                }
            }
            state.pending.push_back(point);
            !std::mem::replace(&mut state.flush_scheduled, true)
        };

        if schedule {
            let this = self.clone();
            let task = self.runtime.spawn(async move { this.flush_loop().await });
            *self.flush_task.lock() = Some(task);
        }
    }

    /// Number of points waiting for export.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.state.lock().flush_scheduled
    }

    async fn flush_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.flush_delay).await;

            let batch = {
                let mut state = self.state.lock();
                let take = state.pending.len().min(self.concurrent);
                if take == 0 {
                    state.flush_scheduled = false;
                    debug!("export queue empty; flush loop idle");
                    return;
                }
                let batch = state.pending.drain(..take).collect::<Vec<_>>();
                state.in_flight = batch.clone();
                batch
            };

            self.post_batch(batch).await;
        }
    }

    async fn post_batch(&self, batch: Vec<Point>) {
        let payload = line_protocol::encode_batch(&self.server_name, &batch);
        let result = self.transport.post(payload).await;

        let mut state = self.state.lock();
        state.in_flight.clear();
        match result {
            Ok(()) => debug!(points = batch.len(), "batch exported"),
            Err(e) => {
                warn!(error = %e, points = batch.len(), "export failed; points kept for next flush");
                self.requeue(&mut state, batch);
            }
        }
    }

    /// Put a failed batch back at the head of the queue, in order.
    fn requeue(&self, state: &mut QueueState, batch: Vec<Point>) {
        for point in batch.into_iter().rev() {
            state.pending.push_front(point);
        }
        while state.pending.len() > self.max_pending {
            state.pending.pop_front();
            state.dropped += 1;
        }
    }

    fn start_heartbeat(self: &Arc<Self>, every: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            let mut last = Instant::now();
            loop {
                tokio::time::sleep(every).await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let delta = now.duration_since(last).as_millis();
                last = now;
                let delta = u64::try_from(delta).unwrap_or(u64::MAX);
                this.enqueue(Point::heartbeat(Utc::now().timestamp_millis(), delta));
            }
        });
        *self.heartbeat_task.lock() = Some(task);
    }

    /// Stop background tasks, then make one last attempt to post what is
    /// still queued, including a batch whose post was cut short. Later
    /// enqueues are ignored.
    pub async fn shutdown(&self) {
        self.state.lock().closed = true;

        let heartbeat = self.heartbeat_task.lock().take();
        if let Some(task) = heartbeat {
            task.abort();
        }
        let flush = self.flush_task.lock().take();
        if let Some(task) = flush {
            task.abort();
            // Wait until the loop is gone so `in_flight` is settled.
            let _ = task.await;
        }

        let remaining = {
            let mut state = self.state.lock();
            state.flush_scheduled = false;
            let mut remaining = std::mem::take(&mut state.in_flight);
            if !remaining.is_empty() {
                debug!(points = remaining.len(), "re-sending interrupted batch");
            }
            remaining.extend(state.pending.drain(..));
            remaining
        };

        for chunk in remaining.chunks(self.concurrent) {
            let payload = line_protocol::encode_batch(&self.server_name, chunk);
            if let Err(e) = self.transport.post(payload).await {
                warn!(error = %e, points = chunk.len(), "final export failed; points lost");
            }
        }
        info!("exporter stopped");
    }
}
