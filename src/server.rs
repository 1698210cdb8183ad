use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
};
use tokio::net::TcpListener;
use tracing::warn;

use crate::router::{Request, Response, ResponseParts, Router};

/// Builds an axum `Router` that hands every request to `app`.
pub fn create_router(app: Router) -> axum::Router {
    axum::Router::new()
        // ── Everything goes through the monitored routing tree ──
        .fallback(dispatch)
        .with_state(app)
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(app))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn dispatch(
    State(app): State<Router>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let req = Request::with_parts(method.as_str(), uri.path(), headers, body.to_vec());
    let res = Response::new();

    if let Err(e) = app.handle(&req, &res) {
        warn!(error = %e, method = %method, path = %uri.path(), "handler failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    // Handlers may finish the response from a spawned task.
    res.finished().await;
    into_http(res.parts())
}

fn into_http(parts: ResponseParts) -> axum::response::Response {
    let mut builder = axum::http::Response::builder().status(parts.status);
    for (name, value) in &parts.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(parts.body))
        .unwrap_or_else(|e| {
            warn!(error = %e, "invalid response parts");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
