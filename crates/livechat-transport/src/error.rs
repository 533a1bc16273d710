use std::time::Duration;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Dialing the remote endpoint failed (DNS, TCP, TLS or the WebSocket
    /// upgrade itself).
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },

    /// The opening handshake did not finish within the allowed time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed. The connection is unusable afterwards.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A single inbound frame was rejected (oversized, bad UTF-8) but the
    /// connection itself is still readable.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl TransportError {
    /// Whether the connection must be abandoned after this error.
    ///
    /// Only [`TransportError::MalformedFrame`] leaves the stream readable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedFrame(_))
    }
}
