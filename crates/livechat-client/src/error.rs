//! Error types for the client layer.

use livechat_protocol::ProtocolError;
use livechat_transport::TransportError;

use crate::ClientState;

/// Errors that can occur while looking up, connecting or driving a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Dial, send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server's reply could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered the join request with something other than a
    /// join reply. Carries the server's body.
    #[error("join rejected: {0}")]
    Verification(String),

    /// The operation is not allowed in the client's current state.
    /// For example, connecting a client that has already been closed.
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: ClientState },

    /// A metadata request failed at the HTTP level.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A metadata request returned a non-zero `code`.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: ClientError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = ClientError::InvalidState {
            op: "connect",
            state: ClientState::Closed,
        };
        assert_eq!(err.to_string(), "cannot connect while Closed");
    }

    #[test]
    fn test_verification_carries_body() {
        let err = ClientError::Verification("{\"code\":-101}".into());
        assert!(err.to_string().contains("-101"));
    }
}
