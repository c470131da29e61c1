//! http-tap: a local development HTTP(S) tap.
//!
//! Listens on one port, forwards every request to a single upstream target
//! and records each request/response exchange along the way.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────┐
//!                   │                     HTTP TAP                     │
//!   Client          │  ┌──────────┐   ┌──────────┐   ┌──────────────┐  │
//!   ────────────────┼─▶│   net    │──▶│   http   │──▶│ net/upstream │──┼──▶ Target
//!   (plain or TLS)  │  │ listener │   │ session  │   │ plain or TLS │  │
//!                   │  │ classify │   │ forward  │   └──────────────┘  │
//!                   │  └──────────┘   └────┬─────┘                     │
//!                   │                      │ Observation               │
//!                   │                      ▼                           │
//!                   │  ┌──────────────────────────────────────────┐    │
//!                   │  │ observability: aggregator, exchange log, │    │
//!                   │  │ tracing, metrics       dashboard (TUI)   │    │
//!                   │  └──────────────────────────────────────────┘    │
//!                   │  ┌──────────┐ ┌──────────┐ ┌─────────────────┐   │
//!                   │  │  config  │ │ security │ │   lifecycle     │   │
//!                   │  └──────────┘ └──────────┘ └─────────────────┘   │
//!                   └──────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dashboard;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use config::TapConfig;
pub use http::TapServer;
pub use lifecycle::Shutdown;
pub use observability::{Aggregator, Observation, Observer};
