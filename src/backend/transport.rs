use std::fmt;

use async_trait::async_trait;

use crate::core::types::SessionId;

/// The channel could not be established. The session never starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    pub endpoint: String,
    pub reason: String,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not connect to {}: {}", self.endpoint, self.reason)
    }
}

impl std::error::Error for ConnectionError {}

/// Errors on an established (or expected) channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// `send`/`receive` before `connect`, or after `close`.
    NotConnected,
    /// The underlying socket failed mid-session.
    Io(String),
    /// The peer spoke something other than text frames we can use.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "transport not connected"),
            TransportError::Io(msg) => write!(f, "transport I/O error: {msg}"),
            TransportError::Protocol(msg) => write!(f, "transport protocol error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Duplex real-time connection to the backend.
///
/// Reconnection is never automatic: after `receive` reports a close or an
/// error, the caller decides whether to `connect` again.
#[async_trait]
pub trait Transport: Send {
    /// Returns the name of the transport.
    fn name(&self) -> &str;

    /// Open the channel for `session_id`. `resume_from` is the last event id
    /// seen on a previous connection, for backends that can replay.
    async fn connect(
        &mut self,
        session_id: &SessionId,
        resume_from: Option<&str>,
    ) -> Result<(), ConnectionError>;

    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next raw text frame. `Ok(None)` means the peer closed the channel.
    ///
    /// Must be cancel-safe: the session loop drops this future whenever
    /// another branch of its `select!` fires first.
    async fn receive(&mut self) -> Result<Option<String>, TransportError>;

    async fn close(&mut self);
}
