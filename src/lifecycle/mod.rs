//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → metrics → observer/log → server → bind → serve
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop flag set → Stop accepting → Drain sessions → Flush exchange log → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Dashboard quit → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: observers exist before the first session can
//! - Ordered shutdown: stop accept, drain, flush
//! - Drain has a deadline; sessions still open after it are abandoned
//! - The stop flag is sticky, so tasks started after a trigger still stop

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, StopSignal};
pub use startup::StartupError;
