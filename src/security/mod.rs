//! Redaction and capture policy.
//!
//! # Data Flow
//! ```text
//! Exchange in flight:
//!     → headers.rs (redacted copy of request/response headers)
//!     → limits.rs (bounded prefix of each body direction)
//!     → observability (only ever sees the redacted, capped view)
//! ```
//!
//! # Design Decisions
//! - Pure functions over borrowed data; the forwarding path is never altered
//! - Policies are immutable after startup and shared without locks

pub mod headers;
pub mod limits;

pub use headers::{RedactionPolicy, REDACTED};
pub use limits::{BodyCapture, DEFAULT_CAPTURE_LIMIT};
