//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, header limits)
//! - Detect conflicting TLS options
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TapConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::TapConfig;
use crate::net::upstream::TargetDescriptor;

/// Smallest read buffer the HTTP/1 parser accepts.
pub const MIN_HEADER_BYTES: usize = 8192;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("upstream.target is required")]
    MissingTarget,

    #[error("upstream.target '{target}' is invalid: {reason}")]
    Target { target: String, reason: String },

    #[error("listener.tls and listener.self_signed are mutually exclusive")]
    ConflictingListenerTls,

    #[error("upstream.client_cert and upstream.client_key must be set together")]
    IncompleteClientIdentity,

    #[error("listener.max_header_bytes must be at least 8192")]
    HeaderLimitTooSmall,

    #[error("listener.max_connections must be greater than zero")]
    NoConnections,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),

    #[error("capture.redact_headers contains an empty name")]
    EmptyRedactedHeader,
}

/// Check a fully assembled configuration.
pub fn validate_config(config: &TapConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.upstream.target.trim().is_empty() {
        errors.push(ValidationError::MissingTarget);
    } else if let Err(e) = TargetDescriptor::parse(&config.upstream.target) {
        errors.push(ValidationError::Target {
            target: config.upstream.target.clone(),
            reason: e.to_string(),
        });
    }

    if config.listener.tls.is_some() && config.listener.self_signed {
        errors.push(ValidationError::ConflictingListenerTls);
    }

    if config.upstream.client_cert.is_some() != config.upstream.client_key.is_some() {
        errors.push(ValidationError::IncompleteClientIdentity);
    }

    if config.listener.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::HeaderLimitTooSmall);
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::NoConnections);
    }

    for (name, value) in [
        ("connect_secs", config.timeouts.connect_secs),
        ("handshake_secs", config.timeouts.handshake_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config
        .capture
        .redact_headers
        .iter()
        .any(|h| h.trim().is_empty())
    {
        errors.push(ValidationError::EmptyRedactedHeader);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    fn valid() -> TapConfig {
        let mut cfg = TapConfig::default();
        cfg.upstream.target = "127.0.0.1:8080".into();
        cfg
    }

    #[test]
    fn accepts_defaults_with_target() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn missing_target_is_reported() {
        let errors = validate_config(&TapConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingTarget]);
    }

    #[test]
    fn collects_every_error() {
        let mut cfg = valid();
        cfg.listener.bind_address = "nowhere".into();
        cfg.listener.self_signed = true;
        cfg.listener.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        cfg.listener.max_header_bytes = 1024;
        cfg.upstream.client_cert = Some("client.pem".into());
        cfg.timeouts.connect_secs = 0;

        let errors = validate_config(&cfg).unwrap_err();
        assert!(errors.contains(&ValidationError::BindAddress("nowhere".into())));
        assert!(errors.contains(&ValidationError::ConflictingListenerTls));
        assert!(errors.contains(&ValidationError::HeaderLimitTooSmall));
        assert!(errors.contains(&ValidationError::IncompleteClientIdentity));
        assert!(errors.contains(&ValidationError::ZeroTimeout("connect_secs")));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut cfg = valid();
        cfg.observability.metrics_address = "bogus".into();
        assert!(validate_config(&cfg).is_ok());

        cfg.observability.metrics_enabled = true;
        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MetricsAddress("bogus".into())]);
    }

    #[test]
    fn unparseable_target_is_reported() {
        let mut cfg = valid();
        cfg.upstream.target = "ftp://files.example".into();
        let errors = validate_config(&cfg).unwrap_err();
        assert!(matches!(errors[0], ValidationError::Target { .. }));
    }
}
