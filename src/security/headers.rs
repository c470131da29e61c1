//! Header redaction.
//!
//! # Responsibilities
//! - Hold the set of header names whose values must never be surfaced
//! - Produce a redacted copy of a header map for observation
//!
//! # Design Decisions
//! - Matching is exact on the name and case-insensitive
//! - The forwarded headers are never touched; only the observed copy is

use hyper::header::{HeaderMap, HeaderValue};

/// Value shown in place of a redacted header.
pub const REDACTED: &str = "<redacted>";

/// Header names redacted when nothing else is configured.
pub const DEFAULT_REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Immutable set of header names to redact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    names: Vec<String>,
}

impl RedactionPolicy {
    /// Build a policy from configured names. Blank entries are ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_unstable();
        names.dedup();
        Self { names }
    }

    pub fn is_redacted(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Return a copy of `headers` with every matching value replaced by [`REDACTED`].
    ///
    /// Repeated headers keep their multiplicity so the view still mirrors the wire.
    pub fn redact(&self, headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            let value = if self.is_redacted(name.as_str()) {
                HeaderValue::from_static(REDACTED)
            } else {
                value.clone()
            };
            out.append(name.clone(), value);
        }
        out
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REDACTED_HEADERS)
    }
}

/// Flatten a header map into sorted `(name, value)` pairs for display.
///
/// Values that are not visible ASCII are summarised as `<N bytes>`.
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            let shown = match value.to_str() {
                Ok(s) => s.to_string(),
                Err(_) => format!("<{} bytes>", value.as_bytes().len()),
            };
            (name.as_str().to_string(), shown)
        })
        .collect();
    pairs.sort();
    pairs
}
