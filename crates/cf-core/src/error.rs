//! Typed error definitions for the casefeed system.
//!
//! Provides [`CfError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate with `anyhow::Result` and can be
//! recovered with `downcast_ref` where the caller needs to branch on them.
//!
//! Statistics that cannot be computed are *not* errors; they surface as `None`
//! in [`CaseStats`](crate::types::CaseStats).

use std::time::Duration;

use thiserror::Error;

/// Domain-specific errors for the casefeed system.
#[derive(Debug, Error)]
pub enum CfError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Socket or websocket handshake failure. Retried at the run level.
    #[error("connect error: {0}")]
    Connect(String),

    /// A bounded operation (receive, connect, whole run) ran out of time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// Outbound frame could not be written.
    #[error("send error: {0}")]
    Send(String),

    /// Malformed inbound frame. Skipped by the collector, never fatal.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// Collection finished without a single case document.
    #[error("no cases collected")]
    EmptyCollection,

    /// Durable storage failure for one case.
    #[error("persistence error for case {case_id}: {reason}")]
    Persistence { case_id: String, reason: String },

    /// Cache read or write failure.
    #[error("cache error: {0}")]
    Cache(String),
}

impl CfError {
    /// Whether a run that failed with this error should be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CfError::Connect(_)
                | CfError::Timeout(_)
                | CfError::Closed
                | CfError::Send(_)
                | CfError::EmptyCollection
                | CfError::Cache(_)
        )
    }
}
