//! Error types for the protocol layer.
//!
//! Inside the ingestion pipeline these never propagate: framing and
//! decompression failures drop the offending frame, parse failures drop the
//! offending message, and the error only explains the drop in the log. The
//! join handshake is the one place a framing error reaches the caller.

/// Errors that can occur while decoding frames or parsing commands.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame header is malformed or its declared lengths do not fit
    /// the buffer.
    #[error("framing error: {0}")]
    Framing(String),

    /// A body too long for the 32-bit length field.
    #[error("frame body of {0} bytes exceeds the 32-bit length field")]
    TooLarge(usize),

    /// A compressed body could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The body of a message packet is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON is valid but does not have the shape its command requires.
    #[error("unexpected shape for {cmd}: {reason}")]
    Shape { cmd: String, reason: String },
}

impl ProtocolError {
    pub(crate) fn framing(reason: impl Into<String>) -> Self {
        Self::Framing(reason.into())
    }
}
