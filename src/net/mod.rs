//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, session slots)
//!     → transport.rs (peek first byte: TLS or plain)
//!     → tls.rs (handshake when a ClientHello arrives)
//!     → connection.rs (session ID, lifecycle tracking)
//!     → Hand off to HTTP layer
//!
//! Upstream side:
//!     upstream.rs (target parsing, connect) → tls.rs (optional) → transport.rs
//! ```
//!
//! # Design Decisions
//! - One listening port serves both TLS and plaintext clients
//! - Identity material lives in identity.rs and is loaded once at startup

pub mod connection;
pub mod identity;
pub mod listener;
pub mod tls;
pub mod transport;
pub mod upstream;

pub use connection::{Session, SessionGuard, SessionId, SessionTracker};
pub use listener::{Listener, ListenerError, SessionPermit};
pub use transport::{Transport, TransportKind};
pub use upstream::{TargetDescriptor, Upstream};
