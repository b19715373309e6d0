//! Request/response value types passed to handlers, and the response framer
//! shared by every code path that emits bytes onto the wire.

use std::collections::HashMap;

/// The value a registered `GET` handler receives.
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Parsed request headers, keyed exactly as received.
    pub headers: HashMap<String, String>,
}

/// The value a registered `POST` handler receives.
#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    /// Parsed request headers, keyed exactly as received.
    pub headers: HashMap<String, String>,
    /// The request body, exactly `Content-Length` bytes.
    pub body: Vec<u8>,
}

/// The value every handler (application or built-in) returns.
///
/// A zero-length body signals "no body": the framer omits injecting
/// `Content-Length` and writes no body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The status-line suffix, e.g. `"200 OK"`.
    pub status: String,
    /// Headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a status line and no headers or body.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header. Does not deduplicate against existing entries.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets `Content-Type` and the body bytes.
    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.headers.push(("Content-Type".to_string(), content_type.into()));
        self.body = body;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Serializes the status line, headers (injecting `Content-Length` for a
    /// non-empty body if not already present), terminating blank line, and
    /// body into a single byte buffer ready to write to the wire.
    pub fn frame(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if !self.body.is_empty() && !self.has_header("Content-Length") {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(self.body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// The fixed 404 body returned for a `GET` miss against both the handler
/// table and the static-resource cache.
pub const NOT_FOUND_HTML: &str =
    "<html><body><h1>404 Not Found</h1><p>Server: Nexus@BetaV1</p></body></html>";

/// The fixed 404 body returned for a `POST` miss against the handler table.
pub const NOT_FOUND_PLAIN: &str = "Handler Not Found | Nexus@BetaV1";
