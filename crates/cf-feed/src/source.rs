//! Websocket-backed [`CaseSource`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use cf_core::config::FeedConfig;
use cf_core::ws::{FeedConnection, HandshakeConfig};

use crate::CaseSource;
use crate::collector::{self, Collection, CollectorSettings};

/// Opens a fresh [`FeedConnection`] for every collection and closes it when
/// the collection ends, whatever the outcome.
pub struct DdpCaseSource {
    name: String,
    handshake: HandshakeConfig,
    settings: CollectorSettings,
}

impl DdpCaseSource {
    pub fn from_config(feed: &FeedConfig) -> Self {
        Self {
            name: format!("ddp:{}", feed.url),
            handshake: handshake_config(feed),
            settings: CollectorSettings::from_feed(feed),
        }
    }
}

/// Handshake headers and timeout derived from the feed config.
pub fn handshake_config(feed: &FeedConfig) -> HandshakeConfig {
    let mut extra_headers = HashMap::new();
    extra_headers.insert("User-Agent".to_string(), feed.effective_user_agent());
    if let Some(origin) = &feed.origin {
        extra_headers.insert("Origin".to_string(), origin.clone());
    }
    HandshakeConfig {
        url: feed.url.clone(),
        extra_headers,
        recv_timeout: feed.effective_recv_timeout(),
    }
}

#[async_trait]
impl CaseSource for DdpCaseSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self) -> Result<Collection> {
        let mut conn = FeedConnection::open(&self.handshake).await?;
        let result = collector::collect(&mut conn, &self.settings).await;
        conn.close().await;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::config::parse_config;

    #[test]
    fn handshake_from_config() {
        let cfg = parse_config(
            r#"{ "feed": { "url": "wss://csgo.net/websocket", "origin": "https://csgo.net", "recv_timeout_sec": 7 } }"#,
        )
        .unwrap();
        let hs = handshake_config(&cfg.feed);
        assert_eq!(hs.url, "wss://csgo.net/websocket");
        assert_eq!(hs.extra_headers["Origin"], "https://csgo.net");
        assert!(hs.extra_headers["User-Agent"].starts_with("Mozilla/5.0"));
        assert_eq!(hs.recv_timeout.as_secs(), 7);

        let source = DdpCaseSource::from_config(&cfg.feed);
        assert_eq!(source.name(), "ddp:wss://csgo.net/websocket");
    }

    #[tokio::test]
    async fn unreachable_feed_fails_collection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = parse_config(&format!(r#"{{ "feed": {{ "url": "ws://127.0.0.1:{port}/websocket" }} }}"#)).unwrap();
        let mut source = DdpCaseSource::from_config(&cfg.feed);
        let err = source.collect().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<cf_core::error::CfError>(), Some(cf_core::error::CfError::Connect(_))));
    }
}
