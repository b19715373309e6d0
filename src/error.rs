//! Top-level, construction-time fatal errors.
//!
//! Per `spec.md` §7, these are the "fatal: log and exit" rows of the error
//! table — bind/listen failure, TLS context init failure, config parse
//! failure. Internal per-connection and per-parse errors never reach this
//! boundary (the handler interface is total; everything else becomes an
//! HTTP status), so they stay as the plain `io::Error`/`rustls::Error`
//! types the relevant module already returns rather than being folded in
//! here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A fatal error encountered while constructing the server, before either
/// listener starts accepting connections.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or listening on a configured address failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The TLS certificate or key file could not be read.
    #[error("failed to read TLS material at {path}: {source}")]
    TlsMaterial {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The certificate/key pair was read but rejected by `rustls`.
    #[error("failed to build TLS server config: {0}")]
    TlsConfig(#[source] rustls::Error),

    /// No usable certificate was found in the PEM file.
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
}
