//! Identity material for the listening side.
//!
//! # Responsibilities
//! - Load a certificate chain and private key from PEM files
//! - Generate an in-memory self-signed identity for local names
//!
//! # Design Decisions
//! - Generated identities are never written to disk and never reused across runs
//! - The SAN set is fixed: `localhost`, `127.0.0.1` and `::1`

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rcgen::{date_time_ymd, Certificate, CertificateParams, DistinguishedName, DnType, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use thiserror::Error;

/// Validity of a generated certificate.
const SELF_SIGNED_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("self-signed certificate generation failed: {0}")]
    Generation(String),
}

/// A certificate chain plus its private key, ready for a TLS server config.
#[derive(Debug)]
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Load a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, IdentityError> {
        let cert_chain = load_certs(cert_path)?;

        let mut reader = open(key_path)?;
        let private_key = rustls_pemfile::private_key(&mut reader)
            .map_err(|source| IdentityError::Read {
                path: key_path.display().to_string(),
                source,
            })?
            .ok_or_else(|| IdentityError::NoPrivateKey(key_path.display().to_string()))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    /// Generate a fresh self-signed identity valid for the loopback names.
    pub fn self_signed() -> Result<Self, IdentityError> {
        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "http-tap local development");
        name.push(DnType::OrganizationName, "http-tap");
        params.distinguished_name = name;
        params.subject_alt_names = vec![
            SanType::DnsName("localhost".to_string()),
            SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];

        // Start yesterday so a skewed client clock still accepts it.
        let today = Utc::now().date_naive();
        let utc_midnight =
            |date: NaiveDate| date_time_ymd(date.year(), date.month() as u8, date.day() as u8);
        params.not_before = utc_midnight(today - Duration::days(1));
        params.not_after = utc_midnight(today + Duration::days(SELF_SIGNED_VALIDITY_DAYS));

        let cert = Certificate::from_params(params)
            .map_err(|e| IdentityError::Generation(e.to_string()))?;
        let cert_der = cert
            .serialize_der()
            .map_err(|e| IdentityError::Generation(e.to_string()))?;
        let key_der = cert.serialize_private_key_der();

        tracing::info!(
            sans = "localhost, 127.0.0.1, ::1",
            valid_days = SELF_SIGNED_VALIDITY_DAYS,
            "Generated in-memory self-signed certificate"
        );

        Ok(Self {
            cert_chain: vec![CertificateDer::from(cert_der)],
            private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }
}

/// Read every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, IdentityError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityError::Read {
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(IdentityError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn open(path: &Path) -> Result<BufReader<File>, IdentityError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| IdentityError::Read {
            path: path.display().to_string(),
            source,
        })
}
