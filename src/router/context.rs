use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

// ─── Request ─────────────────────────────────────────────────────

/// Read-only view of an incoming request. Cheap to clone so handlers
/// can carry it into spawned tasks.
#[derive(Clone)]
pub struct Request {
    method: Arc<str>,
    path: Arc<str>,
    original_path: Arc<str>,
    headers: Arc<Vec<(String, String)>>,
    body: Arc<Vec<u8>>,
}

impl Request {
    pub fn new(method: &str, path: &str) -> Self {
        Self::with_parts(method, path, Vec::new(), Vec::new())
    }

    pub fn with_parts(
        method: &str,
        path: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Self {
        let path: Arc<str> = Arc::from(path);
        Self {
            method: Arc::from(method.to_ascii_uppercase()),
            original_path: path.clone(),
            path,
            headers: Arc::new(headers),
            body: Arc::new(body),
        }
    }

    /// Uppercase HTTP verb.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path relative to the router currently dispatching.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path as received, before any mount prefix was stripped.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Same request as seen from inside a sub-router.
    pub(crate) fn rebase(&self, path: &str) -> Self {
        Self {
            path: Arc::from(path),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

// ─── Response ────────────────────────────────────────────────────

/// The "begin sending headers" operation. Replaceable per response via
/// [`Response::wrap_write_head`].
pub type WriteHead = Arc<dyn Fn(&Response) + Send + Sync>;

/// Shared handle to the response being built. Every clone refers to the
/// same response, so a handler may finish it from a spawned task.
#[derive(Clone)]
pub struct Response {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<ResponseState>,
    done: watch::Sender<bool>,
}

struct ResponseState {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// `write_head` has been entered; it never runs twice
    head_started: bool,
    /// The base header writer ran; headers are frozen
    headers_sent: bool,
    write_head: WriteHead,
}

/// Snapshot handed to the transport once the response is finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseParts {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ResponseState {
                    status: 200,
                    headers: Vec::new(),
                    body: Vec::new(),
                    head_started: false,
                    headers_sent: false,
                    write_head: Arc::new(|res: &Response| res.commit_head()),
                }),
                done,
            }),
        }
    }

    pub fn status(&self) -> u16 {
        self.shared.state.lock().status
    }

    /// Set the status code. Ignored once headers are on their way.
    pub fn set_status(&self, status: u16) -> &Self {
        let mut state = self.shared.state.lock();
        if !state.head_started {
            state.status = status;
        }
        self
    }

    /// Add a header. Ignored once headers are on their way.
    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        let mut state = self.shared.state.lock();
        if !state.head_started {
            state.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn headers_sent(&self) -> bool {
        self.shared.state.lock().headers_sent
    }

    /// Replace the header writer. `wrap` receives the current writer and
    /// returns its replacement, which is expected to delegate to it.
    pub fn wrap_write_head<F>(&self, wrap: F)
    where
        F: FnOnce(WriteHead) -> WriteHead,
    {
        let mut state = self.shared.state.lock();
        let current = state.write_head.clone();
        state.write_head = wrap(current);
    }

    /// Begin sending headers. Runs the installed writer at most once.
    pub fn write_head(&self) {
        let hook = {
            let mut state = self.shared.state.lock();
            if state.head_started {
                return;
            }
            state.head_started = true;
            state.write_head.clone()
        };
        hook(self);
    }

    fn commit_head(&self) {
        self.shared.state.lock().headers_sent = true;
    }

    /// Append to the body, writing headers first if needed.
    pub fn write(&self, chunk: impl AsRef<[u8]>) {
        self.write_head();
        self.shared
            .state
            .lock()
            .body
            .extend_from_slice(chunk.as_ref());
    }

    /// Write `body` and finish the response.
    pub fn send(&self, body: impl AsRef<[u8]>) {
        self.write(body);
        self.end();
    }

    /// Finish the response. Later calls are no-ops.
    pub fn end(&self) {
        self.write_head();
        self.shared.done.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        *self.shared.done.borrow()
    }

    /// Resolves once [`Response::end`] has been called.
    pub async fn finished(&self) {
        let mut rx = self.shared.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn parts(&self) -> ResponseParts {
        let state = self.shared.state.lock();
        ResponseParts {
            status: state.status,
            headers: state.headers.clone(),
            body: state.body.clone(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers_sent", &state.headers_sent)
            .finish()
    }
}
