//! CLI entry point: parses configuration, wires the handler registry and
//! shared collaborators, starts the HTTP listener and (if TLS material is
//! available) the HTTPS listener each on their own thread, then blocks on
//! stdin for an orderly-shutdown signal, per `spec.md` §6 "Process control".

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use nexus_server::config::Config;
use nexus_server::connection::{RouteTable, ServerContext};
use nexus_server::error::ServerError;
use nexus_server::handlers::HandlerRegistry;
use nexus_server::mux::poll::PollMultiplexer;
use nexus_server::resource_cache::ResourceCache;
use nexus_server::response::HttpResponse;
use nexus_server::server::Server;
use nexus_server::workpool::WorkPool;

fn load_tls_config(config: &Config) -> Result<rustls::ServerConfig, ServerError> {
    let cert_bytes = std::fs::read(&config.cert_path).map_err(|source| ServerError::TlsMaterial {
        path: config.cert_path.clone(),
        source,
    })?;
    let key_bytes = std::fs::read(&config.key_path).map_err(|source| ServerError::TlsMaterial {
        path: config.key_path.clone(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ServerError::TlsMaterial {
            path: config.cert_path.clone(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServerError::NoCertificates(config.cert_path.clone()));
    }

    let key = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|source| ServerError::TlsMaterial {
            path: config.key_path.clone(),
            source,
        })?
        .ok_or_else(|| ServerError::NoCertificates(config.key_path.clone()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(ServerError::TlsConfig)
}

fn build_registry(context: Arc<ServerContext>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.add_get("/statistics", move |_req| {
        let total = context.executed_http.load(Ordering::Relaxed)
            + context.executed_https.load(Ordering::Relaxed);
        HttpResponse::new("200 OK").with_body("text/plain", total.to_string().into_bytes())
    });
    registry
}

fn main() {
    env_logger::init();
    let _ = rustls::crypto::ring::default_provider().install_default();
    let config = Config::parse();

    let context = Arc::new(ServerContext::default());
    let handlers = Arc::new(build_registry(context.clone()));
    let resources = Arc::new(ResourceCache::new(config.static_dir.clone()));
    let routes = Arc::new(RouteTable {
        handlers,
        resources,
        context,
    });

    let pool = Arc::new(WorkPool::new(config.worker_count()));
    let timeout = Duration::from_millis(config.connection_timeout_ms);

    let mut http_server = match Server::bind(
        config.http_addr.clone(),
        PollMultiplexer::new(),
        pool.clone(),
        routes.clone(),
        None,
        timeout,
    ) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind HTTP listener on {}: {e}", config.http_addr);
            std::process::exit(1);
        }
    };

    let https_server = if config.tls && config.has_tls_material() {
        match load_tls_config(&config).map(Arc::new).and_then(|tls_config| {
            Server::bind(
                config.https_addr.clone(),
                PollMultiplexer::new(),
                pool.clone(),
                routes.clone(),
                Some(tls_config),
                timeout,
            )
            .map_err(|e| ServerError::Bind {
                addr: config.https_addr.clone(),
                source: e,
            })
        }) {
            Ok(server) => Some(server),
            Err(e) => {
                log::error!("HTTPS listener disabled: {e}");
                None
            }
        }
    } else {
        log::info!("HTTPS listener disabled (no TLS material or --tls=false)");
        None
    };

    let running = Arc::new(AtomicBool::new(true));

    let http_running = running.clone();
    let http_handle = std::thread::spawn(move || {
        http_server.run(Duration::from_millis(5), move || {
            !http_running.load(Ordering::Relaxed)
        });
        http_server
    });

    let https_handle = https_server.map(|mut server| {
        let https_running = running.clone();
        std::thread::spawn(move || {
            server.run(Duration::from_millis(5), move || {
                !https_running.load(Ordering::Relaxed)
            });
            server
        })
    });

    log::info!(
        "nexusd listening: http={} https={}",
        config.http_addr,
        https_handle.is_some()
    );

    let stdin = std::io::stdin();
    let mut line = String::new();
    let _ = stdin.lock().read_line(&mut line);

    running.store(false, Ordering::Relaxed);

    if let Ok(mut server) = http_handle.join() {
        server.close();
    }
    if let Some(handle) = https_handle {
        if let Ok(mut server) = handle.join() {
            server.close();
        }
    }

    match Arc::try_unwrap(pool) {
        Ok(mut pool) => pool.cleanup(),
        Err(pool) => log::debug!(
            "work pool still referenced by {} handle(s) at shutdown",
            Arc::strong_count(&pool)
        ),
    }
}
