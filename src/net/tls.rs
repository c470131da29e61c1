//! TLS termination (listening side) and origination (upstream side).
//!
//! # Responsibilities
//! - Build the server config from identity material
//! - Build the upstream client config: verified or insecure, optional mTLS
//! - Perform handshakes with a deadline
//!
//! # Design Decisions
//! - The `ring` provider is passed explicitly rather than relying on a process default
//! - Verification mode is fixed per process
//! - Only HTTP/1.1 is advertised over ALPN on both sides

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::net::identity::{load_certs, Identity, IdentityError};

const ALPN_HTTP11: &[u8] = b"http/1.1";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),

    #[error("invalid server name '{0}'")]
    ServerName(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build an acceptor presenting `identity`.
pub fn server_acceptor(identity: Identity) -> Result<TlsAcceptor, TlsError> {
    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.private_key)?;
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// How upstream certificates are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Chain must validate against the trust store and match the name.
    Verify,
    /// Accept any certificate.
    Insecure,
}

/// Upstream TLS settings.
#[derive(Debug, Clone)]
pub struct UpstreamTlsOptions {
    pub verification: Verification,
    pub extra_roots: Vec<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for UpstreamTlsOptions {
    fn default() -> Self {
        Self {
            verification: Verification::Verify,
            extra_roots: Vec::new(),
            client_cert: None,
            client_key: None,
        }
    }
}

/// Build a connector for upstream TLS.
pub fn upstream_connector(options: &UpstreamTlsOptions) -> Result<TlsConnector, TlsError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let builder = match options.verification {
        Verification::Verify => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            for path in &options.extra_roots {
                for cert in load_certs(path)? {
                    roots.add(cert)?;
                }
            }
            tracing::debug!(roots = roots.len(), "Upstream trust store ready");
            builder.with_root_certificates(roots)
        }
        Verification::Insecure => {
            tracing::warn!("Upstream certificate verification is DISABLED");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        }
    };

    let mut config = match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => {
            let identity = Identity::from_pem_files(cert, key)?;
            builder.with_client_auth_cert(identity.cert_chain, identity.private_key)?
        }
        _ => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![ALPN_HTTP11.to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse the name presented in SNI and checked against the certificate.
pub fn server_name(name: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(name.to_string()).map_err(|_| TlsError::ServerName(name.to_string()))
}

/// Server-side handshake with a deadline.
pub async fn accept(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    deadline: Duration,
) -> Result<tokio_rustls::server::TlsStream<TcpStream>, TlsError> {
    match tokio::time::timeout(deadline, acceptor.accept(stream)).await {
        Ok(result) => result.map_err(TlsError::Handshake),
        Err(_) => Err(TlsError::HandshakeTimeout(deadline)),
    }
}

/// Client-side handshake with a deadline.
pub async fn connect(
    connector: &TlsConnector,
    name: ServerName<'static>,
    stream: TcpStream,
    deadline: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TlsError> {
    match tokio::time::timeout(deadline, connector.connect(name, stream)).await {
        Ok(result) => result.map_err(TlsError::Handshake),
        Err(_) => Err(TlsError::HandshakeTimeout(deadline)),
    }
}

/// Verifier that accepts every certificate and signature.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
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
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
