//! Latency instrumentation for a request-routing application.
//!
//! A [`Monitor`] attached to a [`Router`] periodically walks the routing
//! tree, wraps every middleware, sub-router and route handler with a
//! timing probe exactly once, and funnels the samples into an
//! append-only log and a batched line-protocol exporter.

pub mod config;
pub mod error;
pub mod instrument;
pub mod metrics;
pub mod monitor;
pub mod router;
pub mod server;

pub use config::{InfluxConfig, MonitorConfig};
pub use error::{DispatchError, MonitorError};
pub use metrics::{MetricsFacade, Sample, Zone};
pub use monitor::Monitor;
pub use router::{Next, Request, Response, Router};
