use std::sync::Arc;

use router_monitor::{Monitor, MonitorConfig, Router};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("router_monitor=info")),
        )
        .init();

    // ── 1. Load options ──────────────────────────────────────────
    let config = match std::env::args().nth(1) {
        Some(path) => match MonitorConfig::from_json_file(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "cannot load monitor config");
                std::process::exit(1);
            }
        },
        None => MonitorConfig::default(),
    };

    // ── 2. Build the application ─────────────────────────────────
    let app = Router::new();
    app.get("/", |_req, res, _next| {
        res.send("Hello World!");
        Ok(())
    });
    let sub = Router::new();
    sub.get("/status", |_req, res, _next| {
        res.set_header("content-type", "application/json");
        res.send(r#"{"ok":"thanks"}"#);
        Ok(())
    });
    app.mount("/sub", &sub);

    // ── 3. Attach the monitor ────────────────────────────────────
    let monitor = match Monitor::attach(&app, config) {
        Ok(monitor) => Arc::new(monitor),
        Err(e) => {
            error!(error = %e, "cannot attach monitor");
            std::process::exit(1);
        }
    };

    #[cfg(unix)]
    {
        if let Err(e) = router_monitor::monitor::rotate_on_hangup(monitor.clone()) {
            error!(error = %e, "SIGHUP log rotation unavailable");
        }
    }

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = "0.0.0.0:3000";
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind; is the port already in use?");
            std::process::exit(1);
        }
    };
    info!(%addr, "server listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(e) = router_monitor::server::serve(listener, app, shutdown).await {
        error!(error = %e, "server exited with error");
    }

    monitor.shutdown().await;
}
