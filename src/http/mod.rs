//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (classified by net::transport)
//!     → server.rs (accept loop, per-session task)
//!     → session.rs (hyper HTTP/1 server, one request at a time)
//!         → body.rs (tee capped body prefixes for observation)
//!         → upstream connection (hyper HTTP/1 client, per session)
//!     → on 101 + Upgrade: websocket.rs (opaque byte tunnel)
//! ```

pub mod body;
pub mod server;
pub mod session;
pub mod websocket;

pub use server::{ServerError, TapServer};
pub use session::{SessionPhase, TapBody};
