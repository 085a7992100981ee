//! Transport seam for the notification channel.
//!
//! `Connector` opens a duplex channel; `Channel` yields inbound events until
//! the peer goes away. The production implementation speaks WebSocket via
//! tokio-tungstenite.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while opening a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Something that happened on an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text payload from the server
    Message(String),
    /// A transport-level fault; the channel ends right after
    Error(String),
}

/// Opens channels to an endpoint.
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    fn open(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Self::Channel, ChannelError>> + Send;
}

/// An open duplex channel.
pub trait Channel: Send + 'static {
    /// Next inbound event, or `None` once the channel has closed.
    fn next_event(&mut self) -> impl Future<Output = Option<ChannelEvent>> + Send;

    /// Close from our side.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn open(&self, url: &str, token: Option<&str>) -> Result<WsChannel, ChannelError> {
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ChannelError::InvalidToken(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = tokio::time::timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| ChannelError::Timeout(self.handshake_timeout))??;

        debug!(
            component = "transport",
            event = "ws.handshake.completed",
            status = response.status().as_u16(),
        );

        Ok(WsChannel {
            stream,
            failed: false,
        })
    }
}

/// An open WebSocket
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
}

impl Channel for WsChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.failed {
            return None;
        }

        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(ChannelEvent::Message(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(ChannelEvent::Message(text)),
                    Err(_) => {
                        debug!(
                            component = "transport",
                            event = "ws.frame.non_utf8",
                            len = bytes.len(),
                            "Ignoring non-UTF-8 binary frame"
                        );
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Ping/Pong are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(ChannelEvent::Error(e.to_string()));
                }
            }
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(
                component = "transport",
                event = "ws.close.failed",
                error = %e,
                "WebSocket close handshake failed"
            );
        }
    }
}
