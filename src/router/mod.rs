//! The routing tree that the monitor instruments.
//!
//! A [`Router`] owns an ordered [`Stack`] of [`RoutingNode`]s. Nodes are
//! either branches (middleware, or a mounted sub-router carrying its own
//! stack) or leaves (a handler bound to one method and path pattern).
//! Requests walk the stack in order; each matching node receives the
//! request, the response and a [`Next`] continuation that resumes the
//! walk at the following node.

pub mod context;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::DispatchError;

pub use context::{Request, Response, ResponseParts, WriteHead};

/// Continuation handed to every dispatch call. Consumed on use, so it
/// can run at most once.
pub type Next = Box<dyn FnOnce() -> Result<(), DispatchError> + Send>;

/// A node's callable: `(request, response, next)`.
pub type Dispatch =
    Arc<dyn Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync>;

/// Box a closure as a [`Dispatch`].
pub fn dispatch_fn<F>(f: F) -> Dispatch
where
    F: Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Replace every run of whitespace with `-`.
pub fn normalize(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("-")
}

// ─── Nodes ───────────────────────────────────────────────────────

pub enum NodeKind {
    /// Middleware (`children == None`) or a mounted sub-router.
    Branch {
        prefix: String,
        children: Option<Arc<Stack>>,
    },
    /// Terminal handler for one verb + path pattern.
    Leaf { method: String, path: String },
}

struct DispatchSlot {
    current: Dispatch,
    /// Pre-instrumentation callable, captured when the node is tagged
    original: Option<Dispatch>,
    tagged: bool,
}

pub struct RoutingNode {
    name: String,
    kind: NodeKind,
    slot: RwLock<DispatchSlot>,
}

impl RoutingNode {
    fn new(name: &str, kind: NodeKind, dispatch: Dispatch) -> Self {
        Self {
            name: normalize(name),
            kind,
            slot: RwLock::new(DispatchSlot {
                current: dispatch,
                original: None,
                tagged: false,
            }),
        }
    }

    pub fn middleware(name: &str, dispatch: Dispatch) -> Self {
        Self::new(
            name,
            NodeKind::Branch {
                prefix: String::new(),
                children: None,
            },
            dispatch,
        )
    }

    pub fn sub_router(prefix: &str, children: Arc<Stack>) -> Self {
        let stack = children.clone();
        let dispatch = dispatch_fn(move |req, res, next| {
            stack.run(0, req.clone(), res.clone(), next)
        });
        Self::new(
            "router",
            NodeKind::Branch {
                prefix: trim_prefix(prefix),
                children: Some(children),
            },
            dispatch,
        )
    }

    pub fn leaf(method: &str, path: &str, dispatch: Dispatch) -> Self {
        let method = method.to_ascii_uppercase();
        Self::new(
            &format!("{method} {path}"),
            NodeKind::Leaf {
                method,
                path: path.to_string(),
            },
            dispatch,
        )
    }

    /// Normalized name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Nested stack of a mounted sub-router.
    pub fn children(&self) -> Option<&Arc<Stack>> {
        match &self.kind {
            NodeKind::Branch { children, .. } => children.as_ref(),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn is_tagged(&self) -> bool {
        self.slot.read().tagged
    }

    /// The callable currently installed.
    pub fn dispatch(&self) -> Dispatch {
        self.slot.read().current.clone()
    }

    /// The callable as it was before tagging.
    pub fn original(&self) -> Option<Dispatch> {
        self.slot.read().original.clone()
    }

    /// Tag the node, capturing its current callable as the original and
    /// installing whatever `wrap` returns in its place. Returns `false`
    /// without touching anything if the node was already tagged.
    pub fn tag_with<F>(&self, wrap: F) -> bool
    where
        F: FnOnce(&Dispatch) -> Option<Dispatch>,
    {
        let mut slot = self.slot.write();
        if slot.tagged {
            return false;
        }
        slot.tagged = true;
        let original = slot.current.clone();
        if let Some(replacement) = wrap(&original) {
            slot.current = replacement;
        }
        slot.original = Some(original);
        true
    }

    /// The request as this node should see it, if the node applies.
    fn accepts(&self, req: &Request) -> Option<Request> {
        match &self.kind {
            NodeKind::Leaf { method, path } => {
                (method == req.method() && path_matches(path, req.path())).then(|| req.clone())
            }
            NodeKind::Branch { prefix, .. } if prefix.is_empty() => Some(req.clone()),
            NodeKind::Branch { prefix, .. } => {
                let rest = req.path().strip_prefix(prefix.as_str())?;
                if rest.is_empty() {
                    Some(req.rebase("/"))
                } else if rest.starts_with('/') {
                    Some(req.rebase(rest))
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Debug for RoutingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingNode")
            .field("name", &self.name)
            .field("tagged", &self.is_tagged())
            .finish()
    }
}

fn trim_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Segment-wise match; `:name` segments match any non-empty segment.
fn path_matches(pattern: &str, path: &str) -> bool {
    let mut pat = pattern.split('/').filter(|s| !s.is_empty());
    let mut got = path.split('/').filter(|s| !s.is_empty());
    loop {
        match (pat.next(), got.next()) {
            (None, None) => return true,
            (Some(p), Some(g)) if p.starts_with(':') || p == g => continue,
            _ => return false,
        }
    }
}

// ─── Stack ───────────────────────────────────────────────────────

/// Ordered, growable list of nodes. Nodes may be appended at any time,
/// including while requests are in flight.
#[derive(Default)]
pub struct Stack {
    nodes: RwLock<Vec<Arc<RoutingNode>>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, node: RoutingNode) -> Arc<RoutingNode> {
        let node = Arc::new(node);
        self.nodes.write().push(node.clone());
        node
    }

    /// Snapshot of the nodes in registration order.
    pub fn nodes(&self) -> Vec<Arc<RoutingNode>> {
        self.nodes.read().clone()
    }

    /// Dispatch `req` through the nodes from index `from` onwards. When
    /// nothing is left, `done` runs.
    pub(crate) fn run(
        self: &Arc<Self>,
        from: usize,
        req: Request,
        res: Response,
        done: Next,
    ) -> Result<(), DispatchError> {
        let found = {
            let nodes = self.nodes.read();
            nodes
                .iter()
                .enumerate()
                .skip(from)
                .find_map(|(idx, node)| node.accepts(&req).map(|seen| (idx, node.clone(), seen)))
        };

        let Some((idx, node, seen)) = found else {
            return done();
        };

        let stack = self.clone();
        let resume = res.clone();
        let next: Next = Box::new(move || stack.run(idx + 1, req, resume, done));
        let dispatch = node.dispatch();
        dispatch(&seen, &res, next)
    }
}

// ─── Router ──────────────────────────────────────────────────────

/// Application-facing handle on a routing tree.
#[derive(Clone, Default)]
pub struct Router {
    stack: Arc<Stack>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root stack, as walked by the scanner.
    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    /// Register middleware that sees every request reaching it.
    pub fn use_fn<F>(&self, name: &str, f: F) -> &Self
    where
        F: Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.stack.push(RoutingNode::middleware(name, dispatch_fn(f)));
        self
    }

    /// Register a handler for `method` + `path`.
    pub fn route<F>(&self, method: &str, path: &str, f: F) -> &Self
    where
        F: Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.stack.push(RoutingNode::leaf(method, path, dispatch_fn(f)));
        self
    }

    pub fn get<F>(&self, path: &str, f: F) -> &Self
    where
        F: Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.route("GET", path, f)
    }

    pub fn post<F>(&self, path: &str, f: F) -> &Self
    where
        F: Fn(&Request, &Response, Next) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.route("POST", path, f)
    }

    /// Mount `router` under `prefix`. Its stack stays shared, so routes
    /// added to it later are still reachable (and still get scanned).
    pub fn mount(&self, prefix: &str, router: &Router) -> &Self {
        self.stack
            .push(RoutingNode::sub_router(prefix, router.stack.clone()));
        self
    }

    /// Run `req` through the tree. Unmatched requests get a 404; a
    /// handler error comes back unchanged.
    pub fn handle(&self, req: &Request, res: &Response) -> Result<(), DispatchError> {
        let fallback = res.clone();
        let method = req.method().to_string();
        let path = req.original_path().to_string();
        let done: Next = Box::new(move || {
            if !fallback.is_finished() {
                let miss = DispatchError::NotFound { method, path };
                fallback.set_status(404);
                fallback.send(miss.to_string());
            }
            Ok(())
        });
        self.stack.run(0, req.clone(), res.clone(), done)
    }
}
