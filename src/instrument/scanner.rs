//! Discovery of routing nodes and probe installation.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use super::probe::{layer_probe, route_probe};
use crate::error::MonitorError;
use crate::metrics::MetricsFacade;
use crate::router::{NodeKind, RoutingNode, Stack};

/// Which node kinds get a probe. Nodes of a disabled kind are still
/// tagged so later scans skip them.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub stat_handle: bool,
    pub stat_router: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            stat_handle: true,
            stat_router: true,
        }
    }
}

/// Walk `stack` depth-first and probe every node not yet tagged.
/// Sub-routers are entered on every scan, so routes added to them later
/// are still found; a sub-router's own probe is installed after its
/// children. Each stack is walked once per call, so a router mounted
/// inside itself (directly or further down) does not loop. Returns the
/// number of nodes tagged by this call.
pub fn scan(stack: &Stack, options: ScanOptions, metrics: &Arc<MetricsFacade>) -> usize {
    let mut visited = HashSet::new();
    scan_stack(stack, options, metrics, &mut visited)
}

fn scan_stack(
    stack: &Stack,
    options: ScanOptions,
    metrics: &Arc<MetricsFacade>,
    visited: &mut HashSet<*const Stack>,
) -> usize {
    if !visited.insert(stack as *const Stack) {
        return 0;
    }
    let mut tagged = 0;
    for node in stack.nodes() {
        if let Some(children) = node.children() {
            tagged += scan_stack(children, options, metrics, visited);
        }
        if !node.is_tagged() && instrument(&node, options, metrics) {
            tagged += 1;
        }
    }
    tagged
}

fn instrument(node: &RoutingNode, options: ScanOptions, metrics: &Arc<MetricsFacade>) -> bool {
    match node.kind() {
        NodeKind::Branch { .. } => {
            let label = format!("{}.handle", node.name());
            node.tag_with(|original| {
                if !options.stat_handle {
                    return None;
                }
                debug!(layer = %label, "probing layer");
                Some(layer_probe(original.clone(), label.clone(), metrics.clone()))
            })
        }
        NodeKind::Leaf { method, path } => {
            let label = format!("{}.{}", method.to_ascii_uppercase(), path);
            node.tag_with(|original| {
                if !options.stat_router {
                    return None;
                }
                debug!(route = %label, "probing route");
                Some(route_probe(original.clone(), label.clone(), metrics.clone()))
            })
        }
    }
}

// ─── Periodic service ────────────────────────────────────────────

/// Background task re-scanning the tree on a fixed delay. Holds only a
/// weak reference: once the application drops its router, scans become
/// no-ops.
pub struct Scanner {
    root: Weak<Stack>,
    options: ScanOptions,
    metrics: Arc<MetricsFacade>,
    task: JoinHandle<()>,
}

impl Scanner {
    /// Start scanning: first after `delay`, then every `interval`.
    pub fn spawn(
        root: &Arc<Stack>,
        options: ScanOptions,
        metrics: Arc<MetricsFacade>,
        delay: Duration,
        interval: Duration,
    ) -> Result<Self, MonitorError> {
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let root = Arc::downgrade(root);

        let weak = root.clone();
        let task_metrics = metrics.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                scan_weak(&weak, options, &task_metrics);
                tokio::time::sleep(interval).await;
            }
        });

        Ok(Self {
            root,
            options,
            metrics,
            task,
        })
    }

    /// Scan immediately, outside the timer.
    pub fn scan_now(&self) -> usize {
        scan_weak(&self.root, self.options, &self.metrics)
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn scan_weak(root: &Weak<Stack>, options: ScanOptions, metrics: &Arc<MetricsFacade>) -> usize {
    match root.upgrade() {
        Some(stack) => {
            let tagged = scan(&stack, options, metrics);
            debug!(tagged, "routing tree scanned");
            tagged
        }
        None => {
            debug!("routing tree gone; nothing to scan");
            0
        }
    }
}
