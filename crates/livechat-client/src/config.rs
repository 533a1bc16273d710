//! Client configuration and chat server address.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on dialing the chat server (TCP, TLS and upgrade).
    pub handshake_timeout_secs: u64,
    /// Interval between heartbeats. The first one is sent immediately.
    pub heartbeat_interval_secs: u64,
    /// Capacity of the raw-frame and packet queues. The outbound message
    /// queue holds twice this.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 5,
            heartbeat_interval_secs: 30,
            queue_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Capacity of the final, consumer-facing queue.
    pub fn message_queue_capacity(&self) -> usize {
        self.queue_capacity * 2
    }

    /// Replace zero values with the defaults so channels and timers can be
    /// built from the config.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.handshake_timeout_secs == 0 {
            tracing::warn!("handshake_timeout_secs is 0, using default");
            self.handshake_timeout_secs = defaults.handshake_timeout_secs;
        }
        if self.heartbeat_interval_secs == 0 {
            tracing::warn!("heartbeat_interval_secs is 0, using default");
            self.heartbeat_interval_secs = defaults.heartbeat_interval_secs;
        }
        if self.queue_capacity == 0 {
            tracing::warn!("queue_capacity is 0, using default");
            self.queue_capacity = defaults.queue_capacity;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// ServerInfo
// ---------------------------------------------------------------------------

/// Where to connect and the key to join with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub url: String,
    pub token: String,
}

impl ServerInfo {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    /// The secure chat endpoint on `host:port`.
    pub fn wss(host: &str, port: u16, token: impl Into<String>) -> Self {
        Self::new(format!("wss://{host}:{port}/sub"), token)
    }
}
