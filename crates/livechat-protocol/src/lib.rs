//! Wire protocol for livechat.
//!
//! This crate defines what travels over the chat socket and what it means:
//!
//! - **Codec** ([`encode`], [`decode`], [`unpack`]): the 16-byte framed
//!   binary format, including zlib/brotli batches of child frames.
//! - **Types** ([`Message`], [`Room`], ...): the closed set of typed events.
//! - **Parser** ([`parse`]): command JSON to [`Message`].
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the client's
//! ingestion pipeline. It has no I/O and no tasks of its own.
//!
//! ```text
//! Transport (bytes) → unpack (Packet) → parse (Message) → consumer
//! ```

pub mod codec;
mod error;
pub mod parser;
mod types;

pub use codec::{
    Frame, FrameHeader, HEADER_LEN, MAX_DECOMPRESSED_LEN, Operation, Packet, SEQUENCE, Version,
    compress, decode, encode, encode_compressed, try_unpack, unpack,
};
pub use error::ProtocolError;
pub use parser::{Command, parse, parse_at, try_parse};
pub use types::{
    BaseMessage, DanMuMessage, EntryMessage, GiftMessage, GuardMessage, HotRankMessage, Liver,
    LiveStatusMessage, Medal, Message, MessageKind, RankCountMessage, Room, RoomChangeMessage,
    RoomFansMessage, SuperChatMessage, User, WatchedChangeMessage,
};
