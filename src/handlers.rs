//! Path-keyed handler registry (C8).
//!
//! Grounded on `examples/original_source/include/net/http_handler.h` and
//! `include/net/basic_handlers.h`'s `{GET, POST}` pair per path. The table
//! is written only while assembling the server, before either listener
//! starts, and is read-only thereafter — no synchronization is needed at
//! steady state, matching `spec.md` §5's concurrency note.

use std::collections::HashMap;
use std::sync::Arc;

use crate::response::{GetRequest, HttpResponse, PostRequest};

/// A registered `GET` handler.
pub type GetHandler = Arc<dyn Fn(&GetRequest) -> HttpResponse + Send + Sync>;
/// A registered `POST` handler.
pub type PostHandler = Arc<dyn Fn(&PostRequest) -> HttpResponse + Send + Sync>;

/// The `{GET callable, POST callable}` pair registered under one path.
#[derive(Clone, Default)]
pub struct HandlerEntry {
    /// Handler invoked for `GET` requests to this path, if any.
    pub get: Option<GetHandler>,
    /// Handler invoked for `POST` requests to this path, if any.
    pub post: Option<PostHandler>,
}

/// Path -> `{GET, POST}` handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    table: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the `GET` handler for `path`.
    pub fn add_get<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&GetRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.table.entry(path.into()).or_default().get = Some(Arc::new(handler));
    }

    /// Registers (or replaces) the `POST` handler for `path`.
    pub fn add_post<F>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(&PostRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.table.entry(path.into()).or_default().post = Some(Arc::new(handler));
    }

    /// Looks up the handler entry registered for an exact path match.
    pub fn lookup(&self, path: &str) -> Option<&HandlerEntry> {
        self.table.get(path)
    }
}
