//! WebSocket transport (`tokio-tungstenite`).
//!
//! The session id and resume point travel as query parameters on the
//! pre-resolved endpoint:
//!
//! ```text
//! ws://host/api/socket?session_id=<id>[&last_event_id=<event id>]
//! ```
//!
//! Control frames (ping/pong) are handled here and never reach the caller.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::backend::transport::{ConnectionError, Transport, TransportError};
use crate::core::types::SessionId;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    endpoint: String,
    socket: Option<Socket>,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

/// Builds the connection URL for one session.
pub fn session_url(
    endpoint: &str,
    session_id: &SessionId,
    resume_from: Option<&str>,
) -> Result<String, ConnectionError> {
    let mut url = reqwest::Url::parse(endpoint).map_err(|e| ConnectionError {
        endpoint: endpoint.to_string(),
        reason: format!("invalid endpoint: {e}"),
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("session_id", session_id.as_str());
        if let Some(event_id) = resume_from {
            query.append_pair("last_event_id", event_id);
        }
    }
    Ok(url.to_string())
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn connect(
        &mut self,
        session_id: &SessionId,
        resume_from: Option<&str>,
    ) -> Result<(), ConnectionError> {
        self.close().await;

        let url = session_url(&self.endpoint, session_id, resume_from)?;
        info!("Connecting to {}", url);
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        debug!("WebSocket handshake status: {}", response.status());
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
            let next = socket.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_string())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("Skipping non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Peer closed the channel: {:?}", frame);
                    self.socket = None;
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {}", e);
                    self.socket = None;
                    return Err(TransportError::Io(e.to_string()));
                }
                None => {
                    self.socket = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                debug!("Close handshake failed: {}", e);
            }
            info!("WebSocket closed");
        }
    }
}
