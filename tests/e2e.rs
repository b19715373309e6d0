//! End-to-end scenarios S1-S6 from `spec.md` §8, driven over real loopback
//! TCP against a background `Server` instance, plus a TLS handshake test
//! using an `rcgen`-generated self-signed certificate.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexus_server::connection::{RouteTable, ServerContext};
use nexus_server::handlers::HandlerRegistry;
use nexus_server::mux::poll::PollMultiplexer;
use nexus_server::resource_cache::ResourceCache;
use nexus_server::response::HttpResponse;
use nexus_server::server::Server;
use nexus_server::workpool::WorkPool;

struct Harness {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn start(static_dir: std::path::PathBuf, timeout: Duration) -> Self {
        let context = Arc::new(ServerContext::default());
        let mut handlers = HandlerRegistry::new();
        {
            let context = context.clone();
            handlers.add_get("/statistics", move |_req| {
                let total = context.executed_http.load(Ordering::Relaxed)
                    + context.executed_https.load(Ordering::Relaxed);
                HttpResponse::new("200 OK").with_body("text/plain", total.to_string().into_bytes())
            });
        }
        let routes = Arc::new(RouteTable {
            handlers: Arc::new(handlers),
            resources: Arc::new(ResourceCache::new(static_dir)),
            context,
        });
        let pool = Arc::new(WorkPool::new(2));

        let mut server = Server::bind(
            "127.0.0.1:0",
            PollMultiplexer::new(),
            pool,
            routes,
            None,
            timeout,
        )
        .expect("bind loopback");
        let addr = server.local_addr().expect("local_addr");

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread = std::thread::spawn(move || {
            server.run(Duration::from_millis(2), move || {
                !thread_running.load(Ordering::Relaxed)
            });
        });

        Self {
            addr,
            running,
            thread: Some(thread),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn roundtrip(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.write_all(request).expect("write request");
    stream.flush().expect("flush");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}

#[test]
fn s1_static_file_hit() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hello").unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    let response = roundtrip(harness.addr, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(
        response,
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello".to_vec()
    );
}

#[test]
fn s2_static_file_miss() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    let response = roundtrip(harness.addr, b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n");
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404 Not Found"));
    assert!(text.contains("Content-Type: text/html"));
    assert!(text.ends_with(
        "<html><body><h1>404 Not Found</h1><p>Server: Nexus@BetaV1</p></body></html>"
    ));
}

#[test]
fn s3_post_miss_returns_plain_text_404() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    let response = roundtrip(
        harness.addr,
        b"POST /missing HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc",
    );
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404 Not Found"));
    assert!(text.contains("Content-Type: text/plain"));
    assert!(text.ends_with("Handler Not Found | Nexus@BetaV1"));
}

#[test]
fn s4_post_without_content_length_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    let response = roundtrip(harness.addr, b"POST /x HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(response, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
}

#[test]
fn s5_unsupported_method_is_405() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    let response = roundtrip(harness.addr, b"PUT / HTTP/1.1\r\n\r\n");
    assert_eq!(response, b"HTTP/1.1 405 Method Not Allowed\r\n\r\n".to_vec());
}

#[test]
fn s6_statistics_counter_increments_across_fresh_connections() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_secs(10));

    for expected in 1..=5 {
        let response = roundtrip(harness.addr, b"GET /statistics HTTP/1.1\r\nHost: x\r\n\r\n");
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(
            text.ends_with(&expected.to_string()),
            "expected body {expected}, got {text:?}"
        );
    }
}

#[test]
fn connection_times_out_without_request() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path().to_path_buf(), Duration::from_millis(200));

    let stream = TcpStream::connect(harness.addr).expect("connect");
    std::thread::sleep(Duration::from_millis(400));
    // The server's sweep should have force-closed the idle connection by
    // now; a read should observe EOF rather than hang.
    let mut stream = stream;
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

mod tls {
    use super::*;
    use std::sync::Arc as StdArc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
    use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, ServerConfig, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAny;

    impl ServerCertVerifier for AcceptAny {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = CertificateDer::from(cert.cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(cert.signing_key.serialize_der()).unwrap();
        (cert_der, key_der)
    }

    /// Serves `index_body` as `./index.html` over a freshly bound TLS
    /// listener, fetches `GET /` through a real `rustls` client connection,
    /// and returns the raw response bytes.
    fn fetch_index_over_tls(index_body: &[u8]) -> Vec<u8> {
        let provider = StdArc::new(rustls::crypto::ring::default_provider());
        let (cert, key) = self_signed();

        let server_config = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), index_body).unwrap();

        let context = Arc::new(ServerContext::default());
        let routes = Arc::new(RouteTable {
            handlers: Arc::new(HandlerRegistry::new()),
            resources: Arc::new(ResourceCache::new(dir.path().to_path_buf())),
            context,
        });
        let pool = Arc::new(WorkPool::new(1));

        let mut server = Server::bind(
            "127.0.0.1:0",
            PollMultiplexer::new(),
            pool,
            routes,
            Some(StdArc::new(server_config)),
            Duration::from_secs(10),
        )
        .expect("bind TLS loopback");
        let addr = server.local_addr().unwrap();

        let running = StdArc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread = std::thread::spawn(move || {
            server.run(Duration::from_millis(2), move || {
                !thread_running.load(Ordering::Relaxed)
            });
        });

        let client_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .dangerous()
            .with_custom_certificate_verifier(StdArc::new(AcceptAny))
            .with_no_client_auth();

        let server_name = ServerName::try_from("localhost").unwrap();
        let mut conn =
            ClientConnection::new(StdArc::new(client_config), server_name).unwrap();
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Drive the handshake to completion.
        while conn.is_handshaking() {
            if conn.wants_write() {
                conn.write_tls(&mut stream).expect("write_tls");
            }
            if conn.wants_read() {
                let n = conn.read_tls(&mut stream).expect("read_tls");
                if n == 0 {
                    break;
                }
                conn.process_new_packets().expect("process_new_packets");
            }
        }

        conn.writer()
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        while conn.wants_write() {
            conn.write_tls(&mut stream).expect("write_tls");
        }

        let mut response = Vec::new();
        loop {
            match conn.read_tls(&mut stream) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
            match conn.process_new_packets() {
                Ok(state) => {
                    let available = state.plaintext_bytes_to_read();
                    if available > 0 {
                        let mut buf = vec![0u8; available];
                        conn.reader().read_exact(&mut buf).unwrap();
                        response.extend_from_slice(&buf);
                    }
                    if state.peer_has_closed() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        running.store(false, Ordering::Relaxed);
        let _ = thread.join();
        response
    }

    #[test]
    fn tls_handshake_and_request_roundtrip() {
        let response = fetch_index_over_tls(b"hello");
        assert_eq!(
            response,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello".to_vec()
        );
    }

    #[test]
    fn tls_response_larger_than_one_chunk_is_not_truncated() {
        // Exceeds connection::CHUNK (1024 bytes), exercising the loop in
        // `TlsConnection::drive_response` that must drain the full response
        // pool across repeated chunks before ending the connection.
        let body = "x".repeat(5000).into_bytes();
        let response = fetch_index_over_tls(&body);

        let header_end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header terminator")
            + 4;
        let (headers, received_body) = response.split_at(header_end);

        assert!(String::from_utf8_lossy(headers).starts_with("HTTP/1.1 200 OK"));
        assert!(String::from_utf8_lossy(headers).contains("Content-Length: 5000"));
        assert_eq!(received_body.len(), body.len());
        assert_eq!(received_body, body.as_slice());
    }
}
