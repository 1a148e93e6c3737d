//! # cf-feed
//!
//! Upstream case feed: protocol, collection and record reconstruction.
//!
//! ## Architecture
//!
//! ```text
//! FeedConnection ──► collector (DDP state machine) ──► Collection
//!                                                       │
//!                                      merge::merge ◄───┘ ──► Vec<CaseRecord>
//! ```
//!
//! - [`ddp`] — outbound frame builders and inbound frame decoding
//! - [`collector`] — connect/subscribe/collect loop over a [`FrameTransport`](cf_core::ws::FrameTransport)
//! - [`merge`] — joins case metadata with item ranges, derives probabilities
//! - [`source`] — [`CaseSource`] backed by a live websocket
//! - [`json_util`] — JSON parsing helpers

pub mod collector;
pub mod ddp;
pub mod json_util;
pub mod merge;
pub mod source;

use anyhow::Result;
use async_trait::async_trait;

pub use collector::{Collection, StopReason};

/// Anything that can produce one collection of raw case documents.
///
/// Only `Send` is required (not `Sync`) because a source is driven by a single
/// refresh run at a time, never concurrently.
#[async_trait]
pub trait CaseSource: Send {
    /// Human-readable source name.
    fn name(&self) -> &str;
    /// Run one full collection and return whatever was gathered.
    async fn collect(&mut self) -> Result<Collection>;
}
