//! Process configuration, parsed from command-line arguments.
//!
//! Grounded on `spec.md` §6 "External interfaces" for the defaults (HTTP on
//! `0.0.0.0:80`, HTTPS on `0.0.0.0:443`, `./static`, 10s connection
//! timeout) and on `vishalbelsare-agentgateway`'s use of `clap`'s derive API
//! for the ambient CLI surface the distilled spec left implicit.

use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for the `nexusd` binary.
#[derive(Debug, Parser)]
#[command(name = "nexusd", about = "Dual-endpoint HTTP/1.1 and HTTPS server")]
pub struct Config {
    /// Address the cleartext HTTP listener binds to.
    #[arg(long, default_value = "0.0.0.0:80")]
    pub http_addr: String,

    /// Address the TLS HTTPS listener binds to.
    #[arg(long, default_value = "0.0.0.0:443")]
    pub https_addr: String,

    /// Root directory the static resource cache serves from.
    #[arg(long, default_value = "./static")]
    pub static_dir: PathBuf,

    /// PEM-encoded certificate chain for the HTTPS listener.
    #[arg(long, default_value = "server.crt")]
    pub cert_path: PathBuf,

    /// PEM-encoded private key for the HTTPS listener.
    #[arg(long, default_value = "server.key")]
    pub key_path: PathBuf,

    /// Number of worker threads in the dispatch pool. Defaults to the
    /// platform's available parallelism.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Connection idle/total-lifetime timeout, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub connection_timeout_ms: u64,

    /// Whether to start the HTTPS listener. Auto-disabled at runtime if
    /// `cert_path`/`key_path` cannot be read, even when left enabled here.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub tls: bool,
}

impl Config {
    /// Resolves the worker count, falling back to available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Whether the configured cert/key pair can actually be read, used to
    /// decide whether the HTTPS listener can start even when `tls` is true.
    pub fn has_tls_material(&self) -> bool {
        self.cert_path.is_file() && self.key_path.is_file()
    }
}
