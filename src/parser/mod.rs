//! HTTP/1.1 request-line and header parsing.
//!
//! Scans a [`SharedPool`] incrementally for the terminating CRLF CRLF,
//! mirroring the mark-based incremental scan in
//! `examples/original_source/include/net/http_resolver.h`
//! (`find_end`/`marks_`/`cached_`) rather than the teacher's own
//! not-yet-working zero-copy attempt in `parser/h1/request.rs`. Once the
//! header block is found the parse is cached; further calls are no-ops.

use std::collections::HashMap;
use std::fmt::{self, Display};

use crate::buffer::SharedPool;

/// The request method, reduced to the three cases the state machine
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// Anything else this server does not implement routing for.
    Unsupported,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Unsupported => "UNSUPPORTED",
        })
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Unsupported,
        }
    }
}

/// Incremental HTTP/1.1 request-line + header parser over a [`SharedPool`].
#[derive(Debug, Default)]
pub struct HttpParser {
    cached: bool,
    scanned: usize,
    method: Method,
    path: String,
    headers: HashMap<String, String>,
    header_end_offset: u64,
}

impl Default for Method {
    fn default() -> Self {
        Method::Unsupported
    }
}

impl HttpParser {
    /// Creates a fresh, unparsed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a full request-line + header block has been seen
    /// and cached. Subsequent calls are idempotent and do not re-scan.
    pub fn header_ended(&mut self, pool: &SharedPool) -> bool {
        if self.cached {
            return true;
        }

        let limit = pool.limit();
        let Ok(holder) = pool.read_at(0, limit) else {
            return false;
        };
        let data = holder.as_slice();

        // Re-examine a few bytes before the last scan point in case the
        // terminator straddled two reads.
        let start = self.scanned.saturating_sub(3);
        let Some(rel_end) = find_header_terminator(&data[start..]) else {
            self.scanned = data.len();
            return false;
        };

        let end = start + rel_end;
        if !self.parse_request(&data[..end]) {
            // Malformed request line within a complete header block: leave
            // uncached so the connection eventually times out rather than
            // silently accepting garbage.
            self.scanned = data.len();
            return false;
        }

        self.header_end_offset = (end + 4) as u64;
        self.cached = true;
        true
    }

    fn parse_request(&mut self, header_block: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(header_block) else {
            return false;
        };
        let mut lines = text.split("\r\n");
        let Some(request_line) = lines.next() else {
            return false;
        };

        let mut parts = request_line.splitn(3, ' ');
        let (Some(method), Some(path), Some(_version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        self.method = Method::from(method);
        self.path = path.to_string();

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some(colon) = line.find(':') else {
                continue;
            };
            let name = &line[..colon];
            let mut value = &line[colon + 1..];
            if let Some(stripped) = value.strip_prefix(' ') {
                value = stripped;
            }
            self.headers.insert(name.to_string(), value.to_string());
        }

        true
    }

    /// The parsed method, or [`Method::Unsupported`] before parsing
    /// completes.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The raw request-target (including any query string), unsplit.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The parsed header map. Keys are case-sensitive as received.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Byte offset in the pool at which the body begins (first byte past
    /// the terminating CRLF CRLF). Only meaningful once cached.
    pub fn header_end_offset(&self) -> u64 {
        self.header_end_offset
    }
}

fn find_header_terminator(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}
