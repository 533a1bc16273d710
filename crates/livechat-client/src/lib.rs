//! Chat client for livechat.
//!
//! Turns a room id into a live stream of typed [`Message`]s:
//!
//! ```ignore
//! let api = ApiClient::new()?;
//! let mut client = api.chat_client(21452505).await?;
//! let mut messages = client.take_messages().expect("first take");
//! client.connect().await?;
//! while let Some(msg) = messages.recv().await {
//!     println!("{}: {}", msg.kind(), msg.cmd());
//! }
//! ```
//!
//! There is no automatic reconnection. A failed `connect` leaves the client
//! `Disconnected`; a closed client stays `Closed`. The caller decides
//! whether to retry with a new client.
//!
//! [`Message`]: livechat_protocol::Message

mod api;
mod client;
mod config;
mod error;
mod pipeline;
mod state;

pub use api::{ApiClient, LIVE_API_BASE, MAIN_API_BASE};
pub use client::{HEARTBEAT_BODY, ProtocolClient, heartbeat_frame, join_frame};
pub use config::{ClientConfig, ServerInfo};
pub use error::ClientError;
pub use pipeline::PipelineMetrics;
pub use state::ClientState;
