//! Integration tests for the egress checks against local servers.
//!
//! A tiny UDP name server stands in for a caller-supplied DNS override and a
//! self-signed TLS listener separates verified from unverified HTTPS.

use hickory_resolver::proto::op::{Message, MessageType, ResponseCode};
use hickory_resolver::proto::rr::{RData, Record, RecordType};
use netprobe::dns::resolve_host;
use netprobe::http::{test_http, test_https, test_https_insecure};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(3);
const KNOWN_NAME: &str = "svc.cluster.test";

// =============================================================================
// Local name server
// =============================================================================

/// Answer A queries for `records`; everything else gets an empty NOERROR.
async fn spawn_dns_server(records: &[(&str, Ipv4Addr)]) -> SocketAddr {
    let records: HashMap<String, Ipv4Addr> = records
        .iter()
        .map(|(name, ip)| ((*name).to_string(), *ip))
        .collect();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };

            let mut reply = Message::new();
            reply
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_op_code(query.op_code())
                .set_recursion_desired(query.recursion_desired())
                .set_recursion_available(true)
                .set_response_code(ResponseCode::NoError);
            for question in query.queries() {
                reply.add_query(question.clone());
                let name = question.name().to_utf8();
                if question.query_type() != RecordType::A {
                    continue;
                }
                if let Some(ip) = records.get(name.trim_end_matches('.')) {
                    reply.add_answer(Record::from_rdata(
                        question.name().clone(),
                        30,
                        RData::A((*ip).into()),
                    ));
                }
            }

            if let Ok(bytes) = reply.to_vec() {
                let _ = socket.send_to(&bytes, peer).await;
            }
        }
    });

    addr
}

// =============================================================================
// Self-signed TLS listener
// =============================================================================

/// Serve `200 ok` over TLS with a certificate no client trusts.
async fn spawn_self_signed_server() -> SocketAddr {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.der().clone()], key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // A client that rejects the certificate aborts the handshake.
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = tls
                    .write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    )
                    .await;
                let _ = tls.shutdown().await;
            });
        }
    });

    addr
}

// =============================================================================
// DNS override
// =============================================================================

#[tokio::test]
async fn test_resolve_host_through_override_server() {
    let dns = spawn_dns_server(&[(KNOWN_NAME, Ipv4Addr::LOCALHOST)]).await;

    let result = resolve_host(
        &CancellationToken::new(),
        &format!("{KNOWN_NAME}@{dns}"),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.target, KNOWN_NAME);
    assert_eq!(
        result.resolved_addresses,
        Some(vec!["127.0.0.1".to_string()])
    );
}

#[tokio::test]
async fn test_http_dials_override_answer_on_target_port() {
    let dns = spawn_dns_server(&[(KNOWN_NAME, Ipv4Addr::LOCALHOST)]).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let port = server.address().port();

    let result = test_http(
        &CancellationToken::new(),
        &format!("{KNOWN_NAME}:{port}@{dns}"),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.target, format!("{KNOWN_NAME}:{port}"));
}

#[tokio::test]
async fn test_name_without_records_fails() {
    let dns = spawn_dns_server(&[(KNOWN_NAME, Ipv4Addr::LOCALHOST)]).await;

    let lookup = resolve_host(
        &CancellationToken::new(),
        &format!("missing.cluster.test@{dns}"),
        TIMEOUT,
    )
    .await
    .unwrap();
    assert!(!lookup.success);
    assert!(lookup.resolved_addresses.is_none());
    assert!(!lookup.error_text().is_empty());

    let dial = test_http(
        &CancellationToken::new(),
        &format!("missing.cluster.test:8080@{dns}"),
        TIMEOUT,
    )
    .await
    .unwrap();
    assert!(!dial.success);
    assert!(dial.status_code.is_none());
    assert!(!dial.error_text().is_empty());
}

// =============================================================================
// Certificate verification
// =============================================================================

#[tokio::test]
async fn test_https_rejects_self_signed_certificate() {
    let addr = spawn_self_signed_server().await;

    let result = test_https(&CancellationToken::new(), &addr.to_string(), TIMEOUT)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.status_code.is_none());
    assert!(
        result.error_text().to_lowercase().contains("certificate"),
        "unexpected error: {}",
        result.error_text()
    );
}

#[tokio::test]
async fn test_https_insecure_accepts_self_signed_certificate() {
    let addr = spawn_self_signed_server().await;

    let result = test_https_insecure(&CancellationToken::new(), &addr.to_string(), TIMEOUT)
        .await
        .unwrap();

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.target, addr.to_string());
}
