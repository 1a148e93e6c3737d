//! WebSocket transport for the upstream feed.

pub mod connection;

pub use connection::{FeedConnection, FrameTransport, HandshakeConfig};
