//! Unified error type for livechat.

use livechat_client::ClientError;
use livechat_protocol::ProtocolError;
use livechat_transport::TransportError;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum LivechatError {
    /// A transport-level error (dial, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, decompression, payload shape).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A client-level error (join rejected, lookup failed, bad state).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Writing events to storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration could not be read or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Waiting for the shutdown signal failed.
    #[error("signal handling failed: {0}")]
    Signal(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let livechat_err: LivechatError = err.into();
        assert!(matches!(livechat_err, LivechatError::Transport(_)));
        assert!(livechat_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_client_error() {
        let err = ClientError::Verification("rejected".into());
        let livechat_err: LivechatError = err.into();
        assert!(matches!(livechat_err, LivechatError::Client(_)));
        assert!(livechat_err.to_string().contains("rejected"));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Invalid("no rooms".into());
        let livechat_err: LivechatError = err.into();
        assert!(matches!(livechat_err, LivechatError::Config(_)));
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::Io(std::io::Error::other("disk full"));
        let livechat_err: LivechatError = err.into();
        assert!(matches!(livechat_err, LivechatError::Store(_)));
    }
}
