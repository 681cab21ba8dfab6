//! WebSocket transport built on tokio-tungstenite.
//!
//! Each frame is one binary WebSocket message. Text messages from the server
//! are accepted as frames too (their UTF-8 bytes), since some proxies re-frame
//! small binary payloads as text.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use zeroize::Zeroizing;

use super::base::{Transport, TransportError, TransportEvent, TransportHandle, TransportResult};

/// Channel capacity for outbound WebSocket messages.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// WebSocket client transport.
#[derive(Default)]
pub struct WebSocketTransport {
    /// Bearer token sent on the upgrade request.
    auth_token: Option<Zeroizing<String>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `Authorization: Bearer <token>` on every upgrade request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(Zeroizing::new(token.into()));
        self
    }

    fn build_request(
        &self,
        endpoint: &str,
    ) -> TransportResult<http::Request<()>> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        if let Some(token) = self.auth_token.as_ref() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|e| TransportError::ConnectFailed(format!("invalid auth token: {e}")))?;
            request
                .headers_mut()
                .insert(http::header::AUTHORIZATION, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        endpoint: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> TransportResult<Box<dyn TransportHandle>> {
        let request = self.build_request(endpoint)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        tracing::info!(endpoint, "WebSocket connected");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<WsMessage>(WS_CHANNEL_CAPACITY);

        // Writer: drains the outbound channel into the socket. Closing the
        // channel closes the socket.
        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, WsMessage::Close(_));
                if let Err(e) = ws_sink.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    let _ = writer_events
                        .send(TransportEvent::Error(format!("send failed: {e}")))
                        .await;
                    return;
                }
                if is_close {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader: forwards frames into the session loop in arrival order.
        let pong_tx = tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let event = match ws_stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => TransportEvent::Frame(data),
                    Some(Ok(WsMessage::Text(text))) => {
                        TransportEvent::Frame(Bytes::copy_from_slice(text.as_bytes()))
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if pong_tx.try_send(WsMessage::Pong(data)).is_err() {
                            tracing::warn!("Failed to queue WebSocket pong");
                        }
                        continue;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                        tracing::info!(code, %reason, "WebSocket closed by server");
                        let _ = events.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: "stream ended".to_string(),
                            })
                            .await;
                        break;
                    }
                };

                if events.send(event).await.is_err() {
                    // Session dropped this connection.
                    break;
                }
            }
        });

        Ok(Box::new(WebSocketHandle {
            sender: Some(tx),
            reader,
        }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Live WebSocket connection.
pub struct WebSocketHandle {
    sender: Option<mpsc::Sender<WsMessage>>,
    reader: JoinHandle<()>,
}

impl TransportHandle for WebSocketHandle {
    fn send(&mut self, frame: Bytes) -> TransportResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TransportError::SendFailed("connection closed".to_string()))?;

        sender
            .try_send(WsMessage::Binary(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::SendFailed("outbound channel full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    TransportError::SendFailed("connection closed".to_string())
                }
            })
    }

    fn close(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.try_send(WsMessage::Close(None));
        }
        self.reader.abort();
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        // The writer exits on its own once the close frame is flushed.
        self.close();
    }
}
