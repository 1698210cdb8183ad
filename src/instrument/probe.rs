use std::sync::Arc;

use tokio::time::Instant;
use tracing::trace;

use crate::metrics::{MetricsFacade, Zone};
use crate::router::{dispatch_fn, Dispatch, Response, WriteHead};

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Wrap a middleware or sub-router callable.
///
/// Measures only the synchronous part of the call: the time until
/// `original` returns. Work a middleware defers through `next` from a
/// spawned task is not included.
pub fn layer_probe(original: Dispatch, label: String, metrics: Arc<MetricsFacade>) -> Dispatch {
    dispatch_fn(move |req, res, next| {
        let start = Instant::now();
        let result = original(req, res, next);
        let elapsed = elapsed_ms(start);
        metrics.record(Zone::Layer, &label, elapsed);
        trace!(label = %label, elapsed_ms = elapsed, "layer executed");
        result
    })
}

/// Wrap a route handler.
///
/// The sample is taken when the response starts writing its headers,
/// so asynchronous work done before responding is counted.
pub fn route_probe(original: Dispatch, label: String, metrics: Arc<MetricsFacade>) -> Dispatch {
    let label: Arc<str> = Arc::from(label);
    dispatch_fn(move |req, res, next| {
        let start = Instant::now();
        let metrics = metrics.clone();
        let label = label.clone();
        res.wrap_write_head(move |write_head| {
            let hook: WriteHead = Arc::new(move |res: &Response| {
                let elapsed = elapsed_ms(start);
                metrics.record(Zone::Route, &label, elapsed);
                trace!(label = %label, elapsed_ms = elapsed, "route executed");
                write_head(res);
            });
            hook
        });
        original(req, res, next)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::router::{Next, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn facade() -> Arc<MetricsFacade> {
        Arc::new(MetricsFacade::new(None, None))
    }

    fn done(counter: Arc<AtomicUsize>) -> Next {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn layer_probe_forwards_everything() {
        let metrics = facade();
        let seen_path = Arc::new(parking_lot::Mutex::new(String::new()));
        let seen = seen_path.clone();
        let original = dispatch_fn(move |req, res, next| {
            *seen.lock() = req.path().to_string();
            res.set_header("x-layer", "1");
            next()
        });

        let probed = layer_probe(original, "auth.handle".into(), metrics.clone());
        let nexts = Arc::new(AtomicUsize::new(0));
        let res = Response::new();
        probed(&Request::new("GET", "/users"), &res, done(nexts.clone())).unwrap();

        assert_eq!(*seen_path.lock(), "/users");
        assert_eq!(nexts.load(Ordering::SeqCst), 1);
        assert_eq!(res.parts().headers, vec![("x-layer".to_string(), "1".to_string())]);
        assert_eq!(metrics.recorded(), 1);
    }

    #[test]
    fn layer_probe_returns_errors_unchanged() {
        let metrics = facade();
        let original = dispatch_fn(|_req, _res, _next| Err(DispatchError::handler("denied")));
        let probed = layer_probe(original, "auth.handle".into(), metrics.clone());

        let nexts = Arc::new(AtomicUsize::new(0));
        let result = probed(&Request::new("GET", "/"), &Response::new(), done(nexts.clone()));

        assert_eq!(result, Err(DispatchError::handler("denied")));
        assert_eq!(nexts.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.recorded(), 1);
    }

    #[test]
    fn route_probe_records_once_at_write_head() {
        let metrics = facade();
        let original = dispatch_fn(|_req, res, _next| {
            res.send("Hello World!");
            Ok(())
        });
        let probed = route_probe(original, "GET./".into(), metrics.clone());

        let res = Response::new();
        let nexts = Arc::new(AtomicUsize::new(0));
        probed(&Request::new("GET", "/"), &res, done(nexts)).unwrap();

        assert_eq!(metrics.recorded(), 1);
        assert!(res.headers_sent());
        assert_eq!(res.parts().body, b"Hello World!");
    }

    #[test]
    fn route_probe_waits_for_response() {
        let metrics = facade();
        let original = dispatch_fn(|_req, _res, _next| Ok(()));
        let probed = route_probe(original, "GET./slow".into(), metrics.clone());

        let res = Response::new();
        probed(&Request::new("GET", "/slow"), &res, Box::new(|| Ok(()))).unwrap();
        assert_eq!(metrics.recorded(), 0);

        res.send("late");
        assert_eq!(metrics.recorded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn route_timing_includes_deferred_work() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.log");
        let metrics = Arc::new(MetricsFacade::new(
            Some(crate::metrics::LogSink::open(&path).unwrap()),
            None,
        ));

        let original = dispatch_fn(|_req, res, _next| {
            let res = res.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                res.send("done");
            });
            Ok(())
        });
        let probed = route_probe(original, "GET./deferred".into(), metrics.clone());

        let res = Response::new();
        probed(&Request::new("GET", "/deferred"), &res, Box::new(|| Ok(()))).unwrap();
        res.finished().await;

        metrics.log().unwrap().flush().unwrap();
        let line = std::fs::read_to_string(&path).unwrap();
        let ms: u64 = line
            .split_whitespace()
            .nth(1)
            .and_then(|field| field.strip_suffix("ms"))
            .and_then(|n| n.parse().ok())
            .unwrap();
        assert!(ms >= 250, "recorded {ms}ms");
    }

    #[tokio::test(start_paused = true)]
    async fn layer_timing_ignores_async_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.log");
        let metrics = Arc::new(MetricsFacade::new(
            Some(crate::metrics::LogSink::open(&path).unwrap()),
            None,
        ));

        let original = dispatch_fn(|_req, _res, next| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = next();
            });
            Ok(())
        });
        let probed = layer_probe(original, "deferring.handle".into(), metrics.clone());

        let nexts = Arc::new(AtomicUsize::new(0));
        probed(&Request::new("GET", "/"), &Response::new(), done(nexts.clone())).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(nexts.load(Ordering::SeqCst), 1);
        metrics.log().unwrap().flush().unwrap();
        let line = std::fs::read_to_string(&path).unwrap();
        assert!(line.contains(" 0ms layer/deferring.handle"), "{line}");
    }
}
