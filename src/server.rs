//! Server loop (C7): accept, register, dispatch `drive` affairs, sweep.
//!
//! Grounded on `examples/ryanseipp-rask-old/src/listener.rs` (accept-until-
//! `WouldBlock`, a `slab::Slab`-backed connection table, sweep-then-
//! reregister) generalized over [`Multiplexer`] instead of `mio::Poll`, and
//! on `spec.md` §4.7 for the per-tick accept/dispatch/sweep sequence.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::ServerConnection;
use slab::Slab;

use crate::connection::{AnyConnection, PlainConnection, RouteTable, TlsConnection};
use crate::mux::{Interest, Multiplexer};
use crate::workpool::WorkPool;

struct Entry {
    conn: Arc<Mutex<AnyConnection>>,
    in_flight: Arc<AtomicBool>,
    fd: RawFd,
}

/// One listener (HTTP or HTTPS), generic over its multiplexer backend.
///
/// Owns the listening socket, the multiplexer, the connection table, and a
/// reference to the (shared, cross-listener) work pool. The handler table
/// and resource cache are reached indirectly through [`RouteTable`].
pub struct Server<M: Multiplexer> {
    listener: TcpListener,
    listener_fd: RawFd,
    mux: M,
    table: Slab<Entry>,
    fd_to_token: HashMap<RawFd, usize>,
    pool: Arc<WorkPool>,
    routes: Arc<RouteTable>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    connection_timeout: Duration,
    closed: bool,
}

impl<M: Multiplexer> Server<M> {
    /// Binds `addr`, registers the listener for readability, and returns a
    /// server ready to be driven by repeated [`Server::tick`] calls.
    ///
    /// `tls_config` selects the connection variant every accepted socket
    /// gets: `Some` builds [`TlsConnection`]s, `None` builds
    /// [`PlainConnection`]s.
    pub fn bind(
        addr: impl ToSocketAddrs,
        mut mux: M,
        pool: Arc<WorkPool>,
        routes: Arc<RouteTable>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        connection_timeout: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listener_fd = listener.as_raw_fd();
        mux.add(listener_fd, Interest::READ)?;

        Ok(Self {
            listener,
            listener_fd,
            mux,
            table: Slab::new(),
            fd_to_token: HashMap::new(),
            pool,
            routes,
            tls_config,
            connection_timeout,
            closed: false,
        })
    }

    fn build_connection(&self, stream: TcpStream) -> Option<AnyConnection> {
        match &self.tls_config {
            Some(cfg) => match ServerConnection::new(cfg.clone()) {
                Ok(tls) => Some(AnyConnection::Tls(TlsConnection::new(
                    stream,
                    tls,
                    self.routes.clone(),
                ))),
                Err(e) => {
                    log::debug!("TLS session init failed: {e}");
                    None
                }
            },
            None => Some(AnyConnection::Plain(PlainConnection::new(
                stream,
                self.routes.clone(),
            ))),
        }
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::debug!("failed to set accepted socket non-blocking: {e}");
                        continue;
                    }
                    let fd = stream.as_raw_fd();
                    let Some(conn) = self.build_connection(stream) else {
                        continue;
                    };

                    if let Err(e) = self.mux.add(fd, Interest::READ) {
                        log::debug!("failed to register accepted socket: {e}");
                        continue;
                    }

                    let token = self.table.insert(Entry {
                        conn: Arc::new(Mutex::new(conn)),
                        in_flight: Arc::new(AtomicBool::new(false)),
                        fd,
                    });
                    self.fd_to_token.insert(fd, token);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::debug!("accept failed: {e}");
                    return;
                }
            }
        }
    }

    /// Posts a `drive` affair for `token` unless one is already in flight
    /// (a second readiness event for a busy connection is coalesced: the
    /// pending drive will re-check readiness on its own).
    fn post_drive(&self, token: usize) {
        let Some(entry) = self.table.get(token) else {
            return;
        };
        if entry.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let conn = entry.conn.clone();
        let in_flight = entry.in_flight.clone();
        self.pool.post(Box::new(move || {
            conn.lock().unwrap().drive();
            in_flight.store(false, Ordering::Release);
        }));
    }

    /// Drops FINISHED and timed-out connections; reposts any still in
    /// EXECUTING, since that state never generates its own readiness event.
    fn sweep(&mut self) {
        let tokens: Vec<usize> = self.table.iter().map(|(token, _)| token).collect();
        let mut drop_list = Vec::new();

        for token in tokens {
            let Some(entry) = self.table.get(token) else {
                continue;
            };
            let Ok(guard) = entry.conn.try_lock() else {
                continue;
            };

            if guard.is_finished() {
                drop_list.push((token, entry.fd));
                continue;
            }

            let expired = guard.created_at().elapsed() >= self.connection_timeout;
            let executing = guard.is_executing();
            drop(guard);

            if expired {
                drop_list.push((token, entry.fd));
                continue;
            }

            if executing {
                self.post_drive(token);
            }
        }

        for (token, fd) in drop_list {
            self.mux.remove(fd);
            self.fd_to_token.remove(&fd);
            if let Some(entry) = self.table.try_remove(token) {
                entry.conn.lock().unwrap().close();
            }
        }
    }

    /// The address the listening socket is actually bound to (useful when
    /// binding to port 0 for tests).
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs one non-blocking poll/dispatch/sweep cycle.
    pub fn tick(&mut self) -> io::Result<()> {
        let events = self.mux.poll(Some(0))?;
        for event in events {
            if event.fd == self.listener_fd {
                self.accept_loop();
            } else if let Some(&token) = self.fd_to_token.get(&event.fd) {
                self.post_drive(token);
            }
        }
        self.sweep();
        Ok(())
    }

    /// Runs [`Server::tick`] in a loop until `should_stop` returns true,
    /// sleeping `idle_sleep` between ticks that found nothing to do.
    pub fn run(&mut self, idle_sleep: Duration, should_stop: impl Fn() -> bool) {
        while !should_stop() {
            if let Err(e) = self.tick() {
                log::error!("server tick failed: {e}");
                break;
            }
            std::thread::sleep(idle_sleep);
        }
    }

    /// Drains the connection table (closing every connection) and releases
    /// the multiplexer. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for (_, entry) in self.table.iter() {
            entry.conn.lock().unwrap().close();
            self.mux.remove(entry.fd);
        }
        self.table.clear();
        self.fd_to_token.clear();
        self.mux.remove(self.listener_fd);
        self.mux.close();
    }
}

impl<M: Multiplexer> Drop for Server<M> {
    fn drop(&mut self) {
        self.close();
    }
}
