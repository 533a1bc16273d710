//! Connection state machine.

use std::fmt;

/// The lifecycle state of a [`ProtocolClient`](crate::ProtocolClient).
///
/// ```text
/// Disconnected → Connecting → Verifying → Active → Closed
///       ↑             │            │
///       └─────────────┴────────────┘  (dial or join failure)
/// ```
///
/// - **Disconnected**: No transport. The only state `connect` accepts.
/// - **Connecting**: Dialing the chat server.
/// - **Verifying**: Join request sent, waiting for the single reply.
/// - **Active**: Heartbeat and read loop running.
/// - **Closed**: Terminal. Reached by `disconnect` or when the read loop
///   ends. A new connection needs a new client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Verifying,
    Active,
    Closed,
}

impl ClientState {
    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        use ClientState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Verifying)
                | (Connecting, Disconnected)
                | (Verifying, Active)
                | (Verifying, Disconnected)
                | (Active, Closed)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Active => write!(f, "Active"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
