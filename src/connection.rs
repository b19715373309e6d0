//! Per-connection state machine (C4): READ -> EXECUTING -> RESPONSE ->
//! FINISHED, with TLS adding a HANDSHAKE state ahead of READ.
//!
//! Grounded on `examples/ryanseipp-rask-old/src/connection.rs` (the
//! `PlainConnection`/`TlsConnection` split, the TLS read/write-BIO loop via
//! `rustls::ServerConnection`/`IoState`) and `spec.md` §4.4 for the exact
//! transition table, which differs from the teacher's `H1Request`-based
//! cleartext parser in favor of `crate::parser::HttpParser` over
//! `crate::buffer::SharedPool`.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rustls::ServerConnection;

use crate::buffer::SharedPool;
use crate::handlers::{GetRequest, HandlerRegistry, PostRequest};
use crate::mux::Interest;
use crate::parser::{HttpParser, Method};
use crate::resource_cache::ResourceCache;
use crate::response::{HttpResponse, NOT_FOUND_HTML, NOT_FOUND_PLAIN};

/// Bytes read from or written to the wire per drive-loop iteration.
const CHUNK: usize = 1024;
/// Initial staging-pool capacity; both pools auto-expand past this.
const INITIAL_POOL_CAPACITY: u64 = 4096;

/// Process-wide counters backing the built-in `/statistics` handler.
#[derive(Debug, Default)]
pub struct ServerContext {
    /// Requests that entered EXECUTING on the cleartext listener.
    pub executed_http: AtomicU64,
    /// Requests that entered EXECUTING on the TLS listener.
    pub executed_https: AtomicU64,
}

/// The shared collaborators every connection consults while executing.
pub struct RouteTable {
    /// Registered `{GET, POST}` handlers.
    pub handlers: Arc<HandlerRegistry>,
    /// Static file cache rooted at the configured static directory.
    pub resources: Arc<ResourceCache>,
    /// Shared request counters.
    pub context: Arc<ServerContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Handshake,
    Read,
    Executing,
    Response,
    Finished,
}

fn is_would_block(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
}

/// The state shared by both connection variants: pools, parser, and the
/// READ/EXECUTING transition logic that does not depend on TLS vs.
/// cleartext framing.
struct Machine {
    state: ConnState,
    request_pool: SharedPool,
    response_pool: SharedPool,
    parser: HttpParser,
    content_length: Option<u64>,
    created_at: Instant,
    routes: Arc<RouteTable>,
}

impl Machine {
    fn new(routes: Arc<RouteTable>, initial_state: ConnState) -> Self {
        let request_pool = SharedPool::new(INITIAL_POOL_CAPACITY);
        request_pool.set_auto_expand(true);
        let response_pool = SharedPool::new(INITIAL_POOL_CAPACITY);
        response_pool.set_auto_expand(true);

        Self {
            state: initial_state,
            request_pool,
            response_pool,
            parser: HttpParser::new(),
            content_length: None,
            created_at: Instant::now(),
            routes,
        }
    }

    /// Runs after bytes have landed in `request_pool`. Drives READ's header
    /// and body-completeness checks; may leave `state` at READ, or move it
    /// to EXECUTING or RESPONSE (400/405).
    fn after_read(&mut self) {
        if !self.parser.header_ended(&self.request_pool) {
            return;
        }

        match self.parser.method() {
            Method::Get => self.state = ConnState::Executing,
            Method::Post => match self.parser.headers().get("Content-Length") {
                None => self.emit(HttpResponse::new("400 Bad Request")),
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(declared) => {
                        self.content_length = Some(declared);
                        let received = self
                            .request_pool
                            .limit()
                            .saturating_sub(self.parser.header_end_offset());
                        if received >= declared {
                            self.state = ConnState::Executing;
                        }
                        // else: remain in READ, more body bytes still expected.
                    }
                    Err(_) => self.emit(HttpResponse::new("400 Bad Request")),
                },
            },
            Method::Unsupported => self.emit(HttpResponse::new("405 Method Not Allowed")),
        }
    }

    fn execute(&mut self, is_tls: bool) {
        if is_tls {
            self.routes.context.executed_https.fetch_add(1, Ordering::Relaxed);
        } else {
            self.routes.context.executed_http.fetch_add(1, Ordering::Relaxed);
        }

        let path = self.parser.path().to_string();
        let method = self.parser.method();
        let entry = self.routes.handlers.lookup(&path);

        let response = match method {
            Method::Get => match entry.and_then(|e| e.get.as_ref()) {
                Some(handler) => {
                    let req = GetRequest {
                        headers: self.parser.headers().clone(),
                    };
                    handler(&req)
                }
                None => self.static_or_404(&path),
            },
            Method::Post => match entry.and_then(|e| e.post.as_ref()) {
                Some(handler) => {
                    let req = PostRequest {
                        headers: self.parser.headers().clone(),
                        body: self.request_body(),
                    };
                    handler(&req)
                }
                None => HttpResponse::new("404 Not Found")
                    .with_body("text/plain", NOT_FOUND_PLAIN.as_bytes().to_vec()),
            },
            Method::Unsupported => unreachable!("READ never advances Unsupported to EXECUTING"),
        };

        self.load_response(response);
    }

    fn static_or_404(&self, path: &str) -> HttpResponse {
        let lookup = if path == "/" { "/index.html" } else { path };
        match self.routes.resources.locate(lookup) {
            Some(res) => HttpResponse::new("200 OK").with_body(res.mime, (*res.bytes).clone()),
            None => HttpResponse::new("404 Not Found")
                .with_body("text/html", NOT_FOUND_HTML.as_bytes().to_vec()),
        }
    }

    fn request_body(&self) -> Vec<u8> {
        let len = self.content_length.unwrap_or(0);
        let start = self.parser.header_end_offset();
        self.request_pool
            .read_at(start, len)
            .map(|holder| holder.into_vec())
            .unwrap_or_default()
    }

    fn emit(&mut self, response: HttpResponse) {
        self.load_response(response);
    }

    fn load_response(&mut self, response: HttpResponse) {
        let framed = response.frame();
        self.response_pool.close();
        self.response_pool.set_auto_expand(true);
        self.response_pool
            .write_next(&framed)
            .expect("response pool write");
        self.response_pool.rewind();
        self.state = ConnState::Response;
    }

    fn is_finished(&self) -> bool {
        self.state == ConnState::Finished
    }

    fn is_executing(&self) -> bool {
        self.state == ConnState::Executing
    }
}

/// A cleartext HTTP/1.1 connection.
pub struct PlainConnection {
    socket: TcpStream,
    machine: Machine,
    shutdown: bool,
}

impl PlainConnection {
    /// Wraps an accepted, non-blocking socket.
    pub fn new(socket: TcpStream, routes: Arc<RouteTable>) -> Self {
        Self {
            socket,
            machine: Machine::new(routes, ConnState::Read),
            shutdown: false,
        }
    }

    fn finish(&mut self) {
        self.machine.state = ConnState::Finished;
        if !self.shutdown {
            let _ = self.socket.shutdown(std::net::Shutdown::Both);
            self.shutdown = true;
        }
    }

    fn drive_read(&mut self) {
        let mut buf = [0u8; CHUNK];
        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => {
                    self.finish();
                    return;
                }
                Ok(n) => {
                    if self.machine.request_pool.write_next(&buf[..n]).is_err() {
                        self.finish();
                        return;
                    }
                }
                Err(e) if is_would_block(&e) => break,
                Err(_) => {
                    self.finish();
                    return;
                }
            }
        }
        self.machine.after_read();
    }

    fn drive_response(&mut self) {
        loop {
            let pos = self.machine.response_pool.position();
            let limit = self.machine.response_pool.limit();
            if pos >= limit {
                self.finish();
                return;
            }

            let chunk_len = (limit - pos).min(CHUNK as u64);
            let holder = self
                .machine
                .response_pool
                .read_at(pos, chunk_len)
                .expect("response pool bounds already validated");

            match self.socket.write(holder.as_slice()) {
                Ok(0) => {
                    self.finish();
                    return;
                }
                Ok(n) => {
                    let new_pos = pos + n as u64;
                    self.machine.response_pool.position_set(new_pos);
                    if new_pos >= limit {
                        self.finish();
                        return;
                    }
                }
                Err(e) if is_would_block(&e) => return,
                Err(_) => {
                    self.finish();
                    return;
                }
            }
        }
    }

    /// Runs one state-machine step.
    pub fn drive(&mut self) {
        match self.machine.state {
            ConnState::Handshake => self.machine.state = ConnState::Read,
            ConnState::Read => self.drive_read(),
            ConnState::Executing => self.machine.execute(false),
            ConnState::Response => self.drive_response(),
            ConnState::Finished => {}
        }
    }

    /// The readiness interest this connection currently needs.
    pub fn interest(&self) -> Interest {
        match self.machine.state {
            ConnState::Response => Interest::READ | Interest::WRITE,
            _ => Interest::READ,
        }
    }

    /// Whether this connection has reached FINISHED.
    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    /// Whether this connection is parked in EXECUTING (needs a repost, not
    /// a readiness event, to keep advancing).
    pub fn is_executing(&self) -> bool {
        self.machine.is_executing()
    }

    /// The underlying socket's descriptor, for multiplexer registration.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// When this connection was accepted.
    pub fn created_at(&self) -> Instant {
        self.machine.created_at
    }

    /// Forces FINISHED cleanup regardless of current state. Idempotent.
    pub fn close(&mut self) {
        self.finish();
    }
}

/// A TLS-wrapped HTTP/1.1 connection.
pub struct TlsConnection {
    socket: TcpStream,
    tls: Box<ServerConnection>,
    machine: Machine,
    shutdown: bool,
}

impl TlsConnection {
    /// Wraps an accepted, non-blocking socket with a fresh TLS session.
    pub fn new(socket: TcpStream, tls: ServerConnection, routes: Arc<RouteTable>) -> Self {
        Self {
            socket,
            tls: Box::new(tls),
            machine: Machine::new(routes, ConnState::Handshake),
            shutdown: false,
        }
    }

    fn finish(&mut self) {
        self.machine.state = ConnState::Finished;
        if !self.shutdown {
            self.tls.send_close_notify();
            let _ = self.tls.write_tls(&mut self.socket);
            let _ = self.socket.shutdown(std::net::Shutdown::Both);
            self.shutdown = true;
        }
    }

    /// Reads raw TLS records off the socket into the session's read buffer.
    /// Mirrors the teacher's `read_tls` accumulate-until-would-block loop.
    fn read_tls_raw(&mut self) -> io::Result<usize> {
        let mut read = 0;
        loop {
            match self.tls.read_tls(&mut self.socket) {
                Ok(0) => return Ok(read),
                Ok(n) => read += n,
                Err(e) if is_would_block(&e) => {
                    if read == 0 {
                        return Err(e);
                    }
                    return Ok(read);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn drive_handshake(&mut self) {
        if self.tls.wants_write() {
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if is_would_block(&e) => {}
                Err(_) => {
                    self.finish();
                    return;
                }
            }
        }

        if self.tls.wants_read() {
            match self.read_tls_raw() {
                Ok(_) => {
                    if self.tls.process_new_packets().is_err() {
                        self.finish();
                        return;
                    }
                }
                Err(e) if is_would_block(&e) => {}
                Err(_) => {
                    self.finish();
                    return;
                }
            }
        }

        if !self.tls.is_handshaking() {
            self.machine.state = ConnState::Read;
        }
    }

    fn drive_read(&mut self) {
        let read = match self.read_tls_raw() {
            Ok(0) => {
                self.finish();
                return;
            }
            Ok(n) => n,
            Err(e) if is_would_block(&e) => 0,
            Err(_) => {
                self.finish();
                return;
            }
        };

        if read > 0 || self.tls.wants_read() {
            let state = match self.tls.process_new_packets() {
                Ok(state) => state,
                Err(_) => {
                    self.finish();
                    return;
                }
            };

            let plaintext_available = state.plaintext_bytes_to_read();
            if plaintext_available > 0 {
                let mut buf = vec![0u8; plaintext_available];
                match self.tls.reader().read_exact(&mut buf) {
                    Ok(()) => {
                        if self.machine.request_pool.write_next(&buf).is_err() {
                            self.finish();
                            return;
                        }
                    }
                    Err(_) => {
                        self.finish();
                        return;
                    }
                }
            }
        }

        self.machine.after_read();
    }

    fn drive_response(&mut self) {
        loop {
            let pos = self.machine.response_pool.position();
            let limit = self.machine.response_pool.limit();

            if pos < limit {
                let chunk_len = (limit - pos).min(CHUNK as u64);
                let holder = self
                    .machine
                    .response_pool
                    .read_at(pos, chunk_len)
                    .expect("response pool bounds already validated");
                // Buffering into the TLS writer never blocks; only flushing
                // the ciphertext to the socket can.
                let _ = self.tls.writer().write_all(holder.as_slice());
                self.machine.response_pool.position_set(pos + chunk_len);
                continue;
            }

            // Per spec, any non-negative write count here ends the
            // connection once the pool is drained — there is no keep-alive.
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => self.finish(),
                Err(e) if is_would_block(&e) => {}
                Err(_) => self.finish(),
            }
            return;
        }
    }

    /// Runs one state-machine step.
    pub fn drive(&mut self) {
        match self.machine.state {
            ConnState::Handshake => self.drive_handshake(),
            ConnState::Read => self.drive_read(),
            ConnState::Executing => self.machine.execute(true),
            ConnState::Response => self.drive_response(),
            ConnState::Finished => {}
        }
    }

    /// The readiness interest this connection currently needs.
    pub fn interest(&self) -> Interest {
        match self.machine.state {
            ConnState::Handshake => {
                let mut interest = Interest::none();
                if self.tls.wants_read() {
                    interest |= Interest::READ;
                }
                if self.tls.wants_write() {
                    interest |= Interest::WRITE;
                }
                interest
            }
            ConnState::Response => Interest::READ | Interest::WRITE,
            _ => Interest::READ,
        }
    }

    /// Whether this connection has reached FINISHED.
    pub fn is_finished(&self) -> bool {
        self.machine.is_finished()
    }

    /// Whether this connection is parked in EXECUTING (needs a repost, not
    /// a readiness event, to keep advancing).
    pub fn is_executing(&self) -> bool {
        self.machine.is_executing()
    }

    /// The underlying socket's descriptor, for multiplexer registration.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// When this connection was accepted.
    pub fn created_at(&self) -> Instant {
        self.machine.created_at
    }

    /// Forces FINISHED cleanup regardless of current state. Idempotent.
    pub fn close(&mut self) {
        self.finish();
    }
}

/// Either connection variant, so the server loop's table can hold one type.
pub enum AnyConnection {
    /// Cleartext.
    Plain(PlainConnection),
    /// TLS-wrapped.
    Tls(TlsConnection),
}

impl AnyConnection {
    /// Runs one state-machine step on whichever variant this is.
    pub fn drive(&mut self) {
        match self {
            AnyConnection::Plain(c) => c.drive(),
            AnyConnection::Tls(c) => c.drive(),
        }
    }

    /// The readiness interest this connection currently needs.
    pub fn interest(&self) -> Interest {
        match self {
            AnyConnection::Plain(c) => c.interest(),
            AnyConnection::Tls(c) => c.interest(),
        }
    }

    /// Whether this connection has reached FINISHED.
    pub fn is_finished(&self) -> bool {
        match self {
            AnyConnection::Plain(c) => c.is_finished(),
            AnyConnection::Tls(c) => c.is_finished(),
        }
    }

    /// Whether this connection is parked in EXECUTING.
    pub fn is_executing(&self) -> bool {
        match self {
            AnyConnection::Plain(c) => c.is_executing(),
            AnyConnection::Tls(c) => c.is_executing(),
        }
    }

    /// The underlying socket's descriptor, for multiplexer registration.
    pub fn fd(&self) -> RawFd {
        match self {
            AnyConnection::Plain(c) => c.fd(),
            AnyConnection::Tls(c) => c.fd(),
        }
    }

    /// When this connection was accepted.
    pub fn created_at(&self) -> Instant {
        match self {
            AnyConnection::Plain(c) => c.created_at(),
            AnyConnection::Tls(c) => c.created_at(),
        }
    }

    /// Forces FINISHED cleanup regardless of current state. Idempotent.
    pub fn close(&mut self) {
        match self {
            AnyConnection::Plain(c) => c.close(),
            AnyConnection::Tls(c) => c.close(),
        }
    }
}
