//! # cf-core
//!
//! Core crate for the casefeed system, providing:
//!
//! - **Types** (`types`) — case/item records, derived statistics, risk levels
//! - **Statistics** (`stats`) — expected return and volatility per case
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — domain-specific `CfError` via thiserror
//! - **WebSocket** (`ws`) — single-shot feed connection with receive timeout
//! - **Time utilities** (`time_util`) — UTC timestamps for snapshots
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod stats;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
