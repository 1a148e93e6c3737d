//! Single websocket connection with a hard per-receive timeout.
//!
//! Unlike a long-lived streaming client, a [`FeedConnection`] lives for exactly
//! one collection: it is opened, driven by the caller through
//! [`FrameTransport::send`] / [`FrameTransport::recv`], and closed. No retry or
//! reconnect logic lives here; the refresh run decides whether to try again.
//!
//! The underlying socket is owned by the connection, so it is released on
//! every exit path: an explicit [`close`](FeedConnection::close), an early
//! return with `?`, or the whole future being dropped by an outer timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::CfError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bidirectional text-frame transport.
///
/// Implemented by [`FeedConnection`] for live sockets and by scripted fakes in
/// tests, so protocol logic can be exercised without a network.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), CfError>;

    /// Read the next text frame.
    ///
    /// - `Ok(Some(text))` — a non-empty frame
    /// - `Ok(None)` — an empty frame (counts as "no data")
    /// - `Err(CfError::Timeout)` — nothing arrived within the receive timeout
    /// - `Err(CfError::Closed)` — the peer closed the stream
    async fn recv(&mut self) -> Result<Option<String>, CfError>;
}

/// Handshake parameters for the upstream endpoint.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Full websocket URL (e.g. `wss://csgo.net/websocket`).
    pub url: String,
    /// Extra HTTP headers for the handshake (`Origin`, `User-Agent`, ...).
    pub extra_headers: HashMap<String, String>,
    /// Bound on the handshake and on every single receive.
    pub recv_timeout: Duration,
}

/// An open websocket to the feed.
pub struct FeedConnection {
    stream: WsStream,
    recv_timeout: Duration,
    label: String,
}

impl FeedConnection {
    /// Connect and complete the websocket handshake within `recv_timeout`.
    pub async fn open(config: &HandshakeConfig) -> Result<Self, CfError> {
        let label = extract_host(&config.url);
        info!("[ws-{label}] connecting to {}", config.url);

        let request = build_request(config)?;
        let stream = match tokio::time::timeout(config.recv_timeout, tokio_tungstenite::connect_async(request)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(CfError::Connect(e.to_string())),
            Err(_) => return Err(CfError::Timeout(config.recv_timeout)),
        };

        info!("[ws-{label}] connected");
        Ok(Self { stream, recv_timeout: config.recv_timeout, label })
    }

    /// Send a close frame and shut the socket down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("[ws-{}] close failed: {e}", self.label);
        }
        info!("[ws-{}] closed", self.label);
    }
}

#[async_trait]
impl FrameTransport for FeedConnection {
    async fn send(&mut self, frame: String) -> Result<(), CfError> {
        debug!("[ws-{}] >> {frame}", self.label);
        self.stream.send(Message::Text(frame.into())).await.map_err(|e| CfError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, CfError> {
        let deadline = tokio::time::Instant::now() + self.recv_timeout;

        loop {
            let next = match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Ok(next) => next,
                Err(_) => return Err(CfError::Timeout(self.recv_timeout)),
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    return Ok(if text.is_empty() { None } else { Some(text.to_string()) });
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(match String::from_utf8(data.to_vec()) {
                        Ok(text) if !text.is_empty() => Some(text),
                        Ok(_) => None,
                        Err(_) => {
                            warn!("[ws-{}] dropping non-UTF-8 binary frame", self.label);
                            None
                        }
                    });
                }
                Some(Ok(Message::Ping(data))) => {
                    // Transport-level keep-alive; protocol pings are answered by the caller.
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Err(CfError::Send(e.to_string()));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    warn!("[ws-{}] received close frame", self.label);
                    return Err(CfError::Closed);
                }
                Some(Err(e)) => {
                    warn!("[ws-{}] read error: {e}", self.label);
                    return Err(CfError::Closed);
                }
                None => {
                    warn!("[ws-{}] stream ended", self.label);
                    return Err(CfError::Closed);
                }
                _ => {} // Pong, Frame: ignore
            }
        }
    }
}

fn build_request(
    config: &HandshakeConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, CfError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

    let mut request =
        config.url.as_str().into_client_request().map_err(|e| CfError::Connect(format!("bad url: {e}")))?;

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| CfError::Connect(format!("bad header name {key}: {e}")))?;
        let value = value
            .parse::<HeaderValue>()
            .map_err(|e| CfError::Connect(format!("bad header value for {key}: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

/// Extract the host from a URL string.
fn extract_host(url: &str) -> String {
    url::Url::parse(url).map(|u| u.host_str().unwrap_or("").to_string()).unwrap_or_default()
}
