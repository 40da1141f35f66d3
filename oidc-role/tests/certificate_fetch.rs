// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Certificate fetching against a local rustls server.
//!
//! The fixtures are a test root CA and a `localhost` leaf it signed:
//!
//! | File | SHA-1 of DER |
//! |------|--------------|
//! | `leaf.der` | `eb538605d9fdc94561a8e3b05259d4ca271d1728` |
//! | `ca.der` | `92107dd7f3d6c8a829e63524fca0d6274e77eade` |

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use oidc_role::errors::ProvisionError;
use oidc_role::thumbprint::{
    CertificateSelector, CertificateSource, TlsCertificateSource, fingerprint_der,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{RootCertStore, ServerConfig, ServerConnection};

const CA_DER: &[u8] = include_bytes!("fixtures/ca.der");
const LEAF_DER: &[u8] = include_bytes!("fixtures/leaf.der");
const LEAF_KEY_DER: &[u8] = include_bytes!("fixtures/leaf.key.der");
const LEAF_SHA1: &str = "eb538605d9fdc94561a8e3b05259d4ca271d1728";
const CA_SHA1: &str = "92107dd7f3d6c8a829e63524fca0d6274e77eade";

/// Serves `chain` to a single TLS client on 127.0.0.1 and returns the port.
fn spawn_server(chain: Vec<CertificateDer<'static>>) -> u16 {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(LEAF_KEY_DER.to_vec()));
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut conn = ServerConnection::new(config).unwrap();
            while conn.is_handshaking() {
                if conn.complete_io(&mut stream).is_err() {
                    return;
                }
            }
            let _ = conn.complete_io(&mut stream);
        }
    });

    port
}

fn test_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(CA_DER.to_vec())).unwrap();
    roots
}

fn leaf_chain() -> Vec<CertificateDer<'static>> {
    vec![CertificateDer::from(LEAF_DER.to_vec())]
}

fn full_chain() -> Vec<CertificateDer<'static>> {
    vec![
        CertificateDer::from(LEAF_DER.to_vec()),
        CertificateDer::from(CA_DER.to_vec()),
    ]
}

#[test]
fn test_fixture_fingerprints() {
    assert_eq!(fingerprint_der(LEAF_DER).unwrap().to_string(), LEAF_SHA1);
    assert_eq!(fingerprint_der(CA_DER).unwrap().to_string(), CA_SHA1);
}

#[tokio::test]
async fn test_leaf_fingerprint_over_tls() {
    let port = spawn_server(leaf_chain());
    let source = TlsCertificateSource::with_roots(test_roots()).unwrap();

    let fingerprint = source
        .fingerprint(&format!("https://localhost:{port}"), CertificateSelector::Leaf)
        .await
        .unwrap();

    assert_eq!(fingerprint.to_string(), LEAF_SHA1);
}

#[tokio::test]
async fn test_top_fingerprint_over_tls() {
    let port = spawn_server(full_chain());
    let source = TlsCertificateSource::with_roots(test_roots()).unwrap();

    let fingerprint = source
        .fingerprint(&format!("https://localhost:{port}"), CertificateSelector::Top)
        .await
        .unwrap();

    assert_eq!(fingerprint.to_string(), CA_SHA1);
}

#[tokio::test]
async fn test_fetch_chain_returns_served_chain() {
    let port = spawn_server(full_chain());
    let source = TlsCertificateSource::with_roots(test_roots()).unwrap();

    let chain = source
        .fetch_chain(&format!("https://localhost:{port}/.well-known/openid-configuration"))
        .await
        .unwrap();

    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].as_ref(), LEAF_DER);
}

#[tokio::test]
async fn test_untrusted_chain_is_rejected() {
    let port = spawn_server(leaf_chain());
    // public roots only, the test CA is not among them
    let source = TlsCertificateSource::new().unwrap();

    let err = source
        .fingerprint(&format!("https://localhost:{port}"), CertificateSelector::Leaf)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::CertificateFetch(_)));
}

#[tokio::test]
async fn test_connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let source = TlsCertificateSource::with_roots(test_roots()).unwrap();

    let err = source
        .fingerprint(&format!("https://127.0.0.1:{port}"), CertificateSelector::Leaf)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::CertificateFetch(_)));
}

#[tokio::test]
async fn test_plain_http_is_rejected() {
    let source = TlsCertificateSource::with_roots(test_roots()).unwrap();

    let err = source
        .fingerprint("http://localhost:1", CertificateSelector::Leaf)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Configuration(_)));
}
