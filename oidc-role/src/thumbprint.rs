// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Certificate fetching and fingerprinting.
//!
//! IAM pins an OIDC identity provider to its issuer through a list of
//! thumbprints: the hex encoded SHA-1 digest of the DER encoding of a
//! certificate served by the issuer's HTTPS endpoint.
//!
//! [`TlsCertificateSource`] connects to the issuer with rustls (aws-lc-rs
//! provider), verifies the chain against the webpki roots and fingerprints the
//! certificate picked by a [`CertificateSelector`].
//!
//! # Security
//!
//! The fingerprint is only as trustworthy as the connection it was taken
//! from. The chain is verified before any certificate is fingerprinted, and the
//! selected certificate is parsed as X.509 so that garbage is never pinned.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use aws_lc_rs::digest::{SHA1_FOR_LEGACY_USE_ONLY, SHA1_OUTPUT_LEN, digest};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;
use x509_cert::der::Decode;

use crate::constants::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, HTTPS_PORT};
use crate::errors::ProvisionError;

/// SHA-1 fingerprint of a DER encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; SHA1_OUTPUT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = ProvisionError;

    /// Accepts `openssl x509 -fingerprint` output (`99:57:AF:...`) as well as
    /// plain hex in either case.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex: String = value.trim().chars().filter(|c| *c != ':').collect();
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|_| ProvisionError::Configuration(format!("invalid thumbprint: {value}")))?;
        let bytes: [u8; SHA1_OUTPUT_LEN] = bytes.try_into().map_err(|_| {
            ProvisionError::Configuration(format!(
                "thumbprint must be {SHA1_OUTPUT_LEN} bytes: {value}"
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Which certificate of the served chain to fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CertificateSelector {
    /// The end-entity certificate, first in the chain.
    #[default]
    Leaf,
    /// The last certificate the server sends, usually the top intermediate CA.
    Top,
}

impl CertificateSelector {
    pub fn select<'a>(&self, chain: &'a [CertificateDer<'static>]) -> Option<&'a [u8]> {
        let cert = match self {
            Self::Leaf => chain.first(),
            Self::Top => chain.last(),
        };
        cert.map(|c| c.as_ref())
    }
}

/// Subject and validity of a certificate, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: u64,
    pub not_after: u64,
}

impl CertificateInfo {
    pub fn is_valid_at(&self, now_secs: u64) -> bool {
        now_secs >= self.not_before && now_secs <= self.not_after
    }
}

/// Parses a DER encoded X.509 certificate.
pub fn describe_der(der: &[u8]) -> Result<CertificateInfo, ProvisionError> {
    let cert = x509_cert::Certificate::from_der(der).map_err(|e| {
        ProvisionError::CertificateFetch(format!("failed to parse certificate: {e:?}"))
    })?;
    let tbs = &cert.tbs_certificate;

    let not_before = match &tbs.validity.not_before {
        x509_cert::time::Time::UtcTime(t) => t.to_unix_duration().as_secs(),
        x509_cert::time::Time::GeneralTime(t) => t.to_unix_duration().as_secs(),
    };
    let not_after = match &tbs.validity.not_after {
        x509_cert::time::Time::UtcTime(t) => t.to_unix_duration().as_secs(),
        x509_cert::time::Time::GeneralTime(t) => t.to_unix_duration().as_secs(),
    };

    Ok(CertificateInfo {
        subject: tbs.subject.to_string(),
        issuer: tbs.issuer.to_string(),
        not_before,
        not_after,
    })
}

/// Fingerprints a DER encoded certificate.
///
/// The bytes must parse as an X.509 certificate.
pub fn fingerprint_der(der: &[u8]) -> Result<Fingerprint, ProvisionError> {
    describe_der(der)?;
    digest_der(der)
}

/// SHA-1 of bytes already known to be a certificate.
fn digest_der(der: &[u8]) -> Result<Fingerprint, ProvisionError> {
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, der);
    let bytes: [u8; SHA1_OUTPUT_LEN] = hash
        .as_ref()
        .try_into()
        .map_err(|_| ProvisionError::CertificateFetch("unexpected digest length".to_string()))?;
    Ok(Fingerprint(bytes))
}

/// Fingerprints the first certificate of a PEM bundle.
pub fn fingerprint_pem(pem: &str) -> Result<Fingerprint, ProvisionError> {
    fingerprint_der(&pem_to_der(pem)?)
}

/// Decodes the first `CERTIFICATE` block of a PEM bundle.
pub fn pem_to_der(pem: &str) -> Result<Vec<u8>, ProvisionError> {
    let body = pem
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != "-----BEGIN CERTIFICATE-----")
        .skip(1)
        .take_while(|line| *line != "-----END CERTIFICATE-----")
        .collect::<String>();

    if body.is_empty() {
        return Err(ProvisionError::CertificateFetch(
            "no PEM certificate found".to_string(),
        ));
    }

    data_encoding::BASE64.decode(body.as_bytes()).map_err(|_| {
        ProvisionError::CertificateFetch("failed to decode certificate base64".to_string())
    })
}

/// Where the issuer fingerprint comes from.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fingerprint(
        &self,
        issuer_url: &str,
        selector: CertificateSelector,
    ) -> Result<Fingerprint, ProvisionError>;
}

/// A fingerprint known ahead of time, e.g. passed with `--thumbprint`.
pub struct StaticCertificateSource(pub Fingerprint);

#[async_trait]
impl CertificateSource for StaticCertificateSource {
    async fn fingerprint(
        &self,
        issuer_url: &str,
        _selector: CertificateSelector,
    ) -> Result<Fingerprint, ProvisionError> {
        tracing::info!("[oidc-role] using configured thumbprint for {}", issuer_url);
        Ok(self.0)
    }
}

/// Fetches the certificate chain over TLS.
pub struct TlsCertificateSource {
    config: Arc<ClientConfig>,
}

impl TlsCertificateSource {
    /// Verifies servers against the Mozilla root program (webpki-roots).
    pub fn new() -> Result<Self, ProvisionError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Verifies servers against the given trust anchors only.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, ProvisionError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProvisionError::CertificateFetch(format!("invalid TLS config: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Returns the verified certificate chain served at `issuer_url`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_chain(
        &self,
        issuer_url: &str,
    ) -> Result<Vec<CertificateDer<'static>>, ProvisionError> {
        let (host, port) = endpoint(issuer_url)?;
        let config = self.config.clone();

        let chain = tokio::task::spawn_blocking(move || handshake(config, &host, port))
            .await
            .map_err(|e| ProvisionError::CertificateFetch(format!("task failed: {e}")))?
            .map_err(|e| ProvisionError::CertificateFetch(format!("{e:#}")))?;

        tracing::debug!(
            "[oidc-role] {} served {} certificates",
            issuer_url,
            chain.len()
        );

        Ok(chain)
    }
}

#[async_trait]
impl CertificateSource for TlsCertificateSource {
    async fn fingerprint(
        &self,
        issuer_url: &str,
        selector: CertificateSelector,
    ) -> Result<Fingerprint, ProvisionError> {
        let chain = self.fetch_chain(issuer_url).await?;
        let der = selector.select(&chain).ok_or_else(|| {
            ProvisionError::CertificateFetch(format!("{issuer_url} served no certificates"))
        })?;

        let info = describe_der(der)?;
        let fingerprint = digest_der(der)?;

        tracing::info!(
            "[oidc-role] {:?} certificate of {}: subject={} issuer={} fingerprint={}",
            selector,
            issuer_url,
            info.subject,
            info.issuer,
            fingerprint
        );

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if !info.is_valid_at(now_secs) {
            tracing::warn!(
                "[oidc-role] certificate {} is outside its validity period",
                info.subject
            );
        }

        Ok(fingerprint)
    }
}

/// Host and port to connect to for an `https://` issuer URL.
fn endpoint(issuer_url: &str) -> Result<(String, u16), ProvisionError> {
    let url = Url::parse(issuer_url).map_err(|e| {
        ProvisionError::Configuration(format!("invalid issuer URL {issuer_url}: {e}"))
    })?;

    if url.scheme() != "https" {
        return Err(ProvisionError::Configuration(format!(
            "issuer URL must use https: {issuer_url}"
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| {
            ProvisionError::Configuration(format!("issuer URL has no host: {issuer_url}"))
        })?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok((host, url.port().unwrap_or(HTTPS_PORT)))
}

/// Connects and completes a TLS handshake, returning the peer chain.
///
/// Blocking; call through `spawn_blocking`.
fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    port: u16,
) -> Result<Vec<CertificateDer<'static>>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| anyhow!("invalid server name {host}: {e}"))?;

    let mut socket = connect(host, port)?;
    socket
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .context("failed to set read timeout")?;
    socket
        .set_write_timeout(Some(HANDSHAKE_TIMEOUT))
        .context("failed to set write timeout")?;

    let mut conn =
        ClientConnection::new(config, server_name).context("failed to create TLS client")?;

    while conn.is_handshaking() {
        conn.complete_io(&mut socket)
            .with_context(|| format!("TLS handshake with {host}:{port} failed"))?;
    }

    let chain = conn
        .peer_certificates()
        .map(|certs| certs.to_vec())
        .ok_or_else(|| anyhow!("{host}:{port} presented no certificates"))?;

    conn.send_close_notify();
    // best effort, the chain is all we need
    let _ = conn.complete_io(&mut socket);

    Ok(chain)
}

fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}:{port}"))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(socket) => {
                tracing::debug!("[oidc-role] connected to {}", addr);
                return Ok(socket);
            }
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => Err(e).with_context(|| format!("failed to connect to {host}:{port}")),
        None => bail!("{host}:{port} resolved to no addresses"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF_PEM: &str = include_str!("../tests/fixtures/leaf.pem");
    const LEAF_DER: &[u8] = include_bytes!("../tests/fixtures/leaf.der");
    const LEAF_SHA1: &str = "eb538605d9fdc94561a8e3b05259d4ca271d1728";

    #[test]
    fn test_fingerprint_der_matches_fixture() {
        let fingerprint = fingerprint_der(LEAF_DER).unwrap();
        assert_eq!(fingerprint.to_string(), LEAF_SHA1);
    }

    #[test]
    fn test_digest_matches_checked_fingerprint() {
        assert_eq!(digest_der(LEAF_DER).unwrap(), fingerprint_der(LEAF_DER).unwrap());
    }

    #[test]
    fn test_fingerprint_pem_matches_der() {
        let from_pem = fingerprint_pem(LEAF_PEM).unwrap();
        let from_der = fingerprint_der(LEAF_DER).unwrap();
        assert_eq!(from_pem, from_der);
    }

    #[test]
    fn test_fingerprint_rejects_garbage() {
        assert!(fingerprint_der(b"not a certificate").is_err());
        assert!(fingerprint_pem("no pem here").is_err());
    }

    #[test]
    fn test_describe_fixture() {
        let info = describe_der(LEAF_DER).unwrap();
        assert_eq!(info.subject, "CN=localhost");
        assert_eq!(info.issuer, "CN=oidc-role test root");
        // 2020-01-01 .. 2120-01-01
        assert_eq!(info.not_before, 1_577_836_800);
        assert!(info.is_valid_at(1_700_000_000));
        assert!(!info.is_valid_at(1_500_000_000));
    }

    #[test]
    fn test_fingerprint_from_str() {
        let plain: Fingerprint = LEAF_SHA1.parse().unwrap();
        let colons: Fingerprint = "EB:53:86:05:D9:FD:C9:45:61:A8:E3:B0:52:59:D4:CA:27:1D:17:28"
            .parse()
            .unwrap();
        assert_eq!(plain, colons);
        assert_eq!(plain.as_bytes().len(), 20);
    }

    #[test]
    fn test_fingerprint_from_str_wrong_length() {
        assert!("abcd".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(20).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_fingerprint_serde() {
        let fingerprint: Fingerprint = LEAF_SHA1.parse().unwrap();
        let json = serde_json::to_string(&fingerprint).unwrap();
        assert_eq!(json, format!("\"{LEAF_SHA1}\""));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fingerprint);
    }

    #[test]
    fn test_selector() {
        let chain = vec![
            CertificateDer::from(vec![1u8]),
            CertificateDer::from(vec![2u8]),
            CertificateDer::from(vec![3u8]),
        ];
        assert_eq!(CertificateSelector::Leaf.select(&chain), Some(&[1u8][..]));
        assert_eq!(CertificateSelector::Top.select(&chain), Some(&[3u8][..]));
        assert_eq!(CertificateSelector::Leaf.select(&[]), None);
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            endpoint("https://token.actions.githubusercontent.com").unwrap(),
            ("token.actions.githubusercontent.com".to_string(), 443)
        );
        assert_eq!(
            endpoint("https://localhost:8443/path").unwrap(),
            ("localhost".to_string(), 8443)
        );
    }

    #[test]
    fn test_endpoint_rejects_http() {
        assert!(matches!(
            endpoint("http://token.actions.githubusercontent.com"),
            Err(ProvisionError::Configuration(_))
        ));
        assert!(endpoint("token.actions.githubusercontent.com").is_err());
    }

    #[tokio::test]
    async fn test_static_source() {
        let fingerprint: Fingerprint = LEAF_SHA1.parse().unwrap();
        let source = StaticCertificateSource(fingerprint);
        let result = source
            .fingerprint("https://example.com", CertificateSelector::Leaf)
            .await
            .unwrap();
        assert_eq!(result, fingerprint);
    }
}
