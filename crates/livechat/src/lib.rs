//! # Livechat
//!
//! Records the chat traffic of live rooms.
//!
//! The layers below this crate turn a WebSocket into typed events:
//! `livechat-transport` moves bytes, `livechat-protocol` frames and parses
//! them, `livechat-client` runs the per-room connection and its pipeline.
//! This crate composes them: a [`Monitor`] drives many rooms and writes their
//! events to a [`Store`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livechat::prelude::*;
//!
//! # async fn run() -> Result<(), LivechatError> {
//! let config = Config::load("livechat.yaml")?;
//! let store = open_store(&config.storage).await?;
//! let api = ApiClient::new()?.with_client_config(config.client.clone());
//!
//! let mut monitor = Monitor::new(config.monitor.clone(), store);
//! monitor.prepare(&api, &config.rooms).await?;
//! monitor.run_until_ctrl_c().await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod store;

pub use config::{
    Config, ConfigError, LogAppender, LogConfig, MonitorConfig, StorageBackend, StorageConfig,
};
pub use error::LivechatError;
pub use monitor::Monitor;
pub use store::{JsonLinesStore, MemoryStore, Record, Store, StoreError, open_store};

pub mod prelude {
    pub use crate::{
        Config, JsonLinesStore, LivechatError, MemoryStore, Monitor, Store, open_store,
    };
    pub use livechat_client::{ApiClient, ClientConfig, ProtocolClient, ServerInfo};
    pub use livechat_protocol::{Message, MessageKind, Room};
}
