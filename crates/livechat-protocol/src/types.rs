//! Typed events and the room they belong to.
//!
//! [`Message`] is a closed set: every command the parser understands maps to
//! exactly one variant, and consumers match on it exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Room identity
// ---------------------------------------------------------------------------

/// The streamer who owns a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liver {
    pub uid: i64,
    pub uname: String,
}

/// A monitored live room.
///
/// `id` is the number users see in the URL (possibly a short alias);
/// `real_id` is the canonical id the chat server expects in the join request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub real_id: i64,
    pub title: String,
    pub is_live: bool,
    pub liver: Liver,
}

impl Room {
    /// Applies a room-level change event in place.
    ///
    /// Returns `true` if the message changed the room.
    pub fn apply(&mut self, msg: &Message) -> bool {
        match msg {
            Message::LiveStatus(m) if m.live != self.is_live => {
                self.is_live = m.live;
                true
            }
            Message::RoomChange(m) if m.title != self.title => {
                self.title.clone_from(&m.title);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared parts
// ---------------------------------------------------------------------------

/// Fields every event carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMessage {
    /// The command string exactly as the server sent it.
    pub cmd: String,
    /// Event time in Unix seconds.
    pub timestamp: i64,
}

/// Fan badge: a viewer's loyalty level towards one streamer.
///
/// `uid == 0` means the viewer has no badge or hides it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medal {
    pub level: i64,
    /// The streamer the badge belongs to.
    pub uid: i64,
    pub name: String,
}

/// The viewer who caused an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: i64,
    pub uname: String,
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// A chat line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DanMuMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub user: User,
    pub medal: Medal,
    /// The sender's live-viewer level.
    pub live_level: i64,
    pub text: String,
    /// Scrolling, bottom or top.
    pub mode: i64,
    pub font_size: i64,
    /// Decimal RGB.
    pub color: i64,
}

/// A paid, pinned chat line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperChatMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub user: User,
    pub medal: Medal,
    pub live_level: i64,
    pub text: String,
    pub price: f64,
}

/// A gift, either a single send or an aggregated combo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub user: User,
    pub medal: Medal,
    pub gift_id: i64,
    pub gift_name: String,
    /// Unit price for single sends, total value for combos.
    pub price: f64,
    pub num: i64,
    pub combo: bool,
}

/// A paid membership purchase or renewal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub user: User,
    /// Membership tier name.
    pub role_name: String,
    pub price: f64,
}

/// A viewer entered the room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub user: User,
    pub medal: Medal,
}

/// Follower and fan-club totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFansMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub fans: i64,
    pub fans_club: i64,
}

/// Viewers on the energy rank; a lower bound on the live audience.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankCountMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub count: i64,
}

/// The room's position in its category ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotRankMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub rank: i64,
    pub area: String,
}

/// The stream went on or off air.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatusMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub live: bool,
}

/// Title or category edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomChangeMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub title: String,
    pub area_name: String,
    pub parent_area_name: String,
}

/// Cumulative "watched" counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedChangeMessage {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub num: i64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every event the parser can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    #[serde(rename = "danmu")]
    DanMu(DanMuMessage),
    SuperChat(SuperChatMessage),
    Gift(GiftMessage),
    Guard(GuardMessage),
    Entry(EntryMessage),
    RoomFans(RoomFansMessage),
    RankCount(RankCountMessage),
    HotRank(HotRankMessage),
    LiveStatus(LiveStatusMessage),
    RoomChange(RoomChangeMessage),
    WatchedChange(WatchedChangeMessage),
}

impl Message {
    /// The shared command/timestamp part.
    pub fn base(&self) -> &BaseMessage {
        match self {
            Self::DanMu(m) => &m.base,
            Self::SuperChat(m) => &m.base,
            Self::Gift(m) => &m.base,
            Self::Guard(m) => &m.base,
            Self::Entry(m) => &m.base,
            Self::RoomFans(m) => &m.base,
            Self::RankCount(m) => &m.base,
            Self::HotRank(m) => &m.base,
            Self::LiveStatus(m) => &m.base,
            Self::RoomChange(m) => &m.base,
            Self::WatchedChange(m) => &m.base,
        }
    }

    /// The raw command string, e.g. `"COMBO_SEND"`.
    pub fn cmd(&self) -> &str {
        &self.base().cmd
    }

    /// Event time in Unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.base().timestamp
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DanMu(_) => MessageKind::DanMu,
            Self::SuperChat(_) => MessageKind::SuperChat,
            Self::Gift(_) => MessageKind::Gift,
            Self::Guard(_) => MessageKind::Guard,
            Self::Entry(_) => MessageKind::Entry,
            Self::RoomFans(_) => MessageKind::RoomFans,
            Self::RankCount(_) => MessageKind::RankCount,
            Self::HotRank(_) => MessageKind::HotRank,
            Self::LiveStatus(_) => MessageKind::LiveStatus,
            Self::RoomChange(_) => MessageKind::RoomChange,
            Self::WatchedChange(_) => MessageKind::WatchedChange,
        }
    }
}

/// Fieldless mirror of [`Message`], used to key storage and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[serde(rename = "danmu")]
    DanMu,
    SuperChat,
    Gift,
    Guard,
    Entry,
    RoomFans,
    RankCount,
    HotRank,
    LiveStatus,
    RoomChange,
    WatchedChange,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        Self::DanMu,
        Self::SuperChat,
        Self::Gift,
        Self::Guard,
        Self::Entry,
        Self::RoomFans,
        Self::RankCount,
        Self::HotRank,
        Self::LiveStatus,
        Self::RoomChange,
        Self::WatchedChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DanMu => "danmu",
            Self::SuperChat => "super_chat",
            Self::Gift => "gift",
            Self::Guard => "guard",
            Self::Entry => "entry",
            Self::RoomFans => "room_fans",
            Self::RankCount => "rank_count",
            Self::HotRank => "hot_rank",
            Self::LiveStatus => "live_status",
            Self::RoomChange => "room_change",
            Self::WatchedChange => "watched_change",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
