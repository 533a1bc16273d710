//! Command parser: turns a message packet's JSON body into a [`Message`].
//!
//! Command payloads are heterogeneous and loosely typed (numbers arrive as
//! strings, optional objects go missing), so fields are read leniently by
//! JSON pointer: a missing or mistyped field becomes its zero value rather
//! than failing the whole message.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::codec::Operation;
use crate::types::{
    BaseMessage, DanMuMessage, EntryMessage, GiftMessage, GuardMessage, HotRankMessage,
    LiveStatusMessage, Medal, Message, RankCountMessage, RoomChangeMessage, RoomFansMessage,
    SuperChatMessage, User, WatchedChangeMessage,
};
use crate::ProtocolError;

/// Sub-unit money fields (gift and membership prices) are in thousandths.
const MONEY_SCALE: f64 = 1000.0;

/// Entry-effect notices carry no badge; they are only shown for members,
/// who are assumed to hold this badge level.
pub const ENTRY_EFFECT_MEDAL_LEVEL: i64 = 21;

/// `copy_writing` looks like `欢迎舰长 <%name%> 进入直播间`: the name starts
/// after a 7-character prefix and is followed by an 8-character suffix.
const COPY_WRITING_PREFIX: usize = 7;
const COPY_WRITING_SUFFIX: usize = 8;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Every command string the parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    DanMu,
    SuperChat,
    SendGift,
    ComboSend,
    UserToast,
    InteractWord,
    EntryEffect,
    RoomRealTimeUpdate,
    OnlineRankCount,
    HotRankChanged,
    Live,
    Preparing,
    RoomChange,
    WatchedChange,
    /// A viewer was muted. Recognized and deliberately dropped.
    RoomBlack,
    /// The stream was cut by a moderator. Recognized and deliberately dropped.
    CutOff,
}

impl Command {
    pub const ALL: [Command; 16] = [
        Self::DanMu,
        Self::SuperChat,
        Self::SendGift,
        Self::ComboSend,
        Self::UserToast,
        Self::InteractWord,
        Self::EntryEffect,
        Self::RoomRealTimeUpdate,
        Self::OnlineRankCount,
        Self::HotRankChanged,
        Self::Live,
        Self::Preparing,
        Self::RoomChange,
        Self::WatchedChange,
        Self::RoomBlack,
        Self::CutOff,
    ];

    /// The wire string for this command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DanMu => "DANMU_MSG",
            Self::SuperChat => "SUPER_CHAT_MESSAGE",
            Self::SendGift => "SEND_GIFT",
            Self::ComboSend => "COMBO_SEND",
            Self::UserToast => "USER_TOAST_MSG",
            Self::InteractWord => "INTERACT_WORD",
            Self::EntryEffect => "ENTRY_EFFECT",
            Self::RoomRealTimeUpdate => "ROOM_REAL_TIME_MESSAGE_UPDATE",
            Self::OnlineRankCount => "ONLINE_RANK_COUNT",
            Self::HotRankChanged => "HOT_RANK_CHANGED_V2",
            Self::Live => "LIVE",
            Self::Preparing => "PREPARING",
            Self::RoomChange => "ROOM_CHANGE",
            Self::WatchedChange => "WATCHED_CHANGE",
            Self::RoomBlack => "ROOM_BLACK_MSG",
            Self::CutOff => "CUT_OFF",
        }
    }

    /// Exact-match lookup of a wire string.
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == cmd)
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parses one packet, stamping server-less events with the current time.
///
/// Returns `None` for heartbeat replies, non-message operations, unknown or
/// ignored commands, and malformed payloads. Malformed payloads are logged at
/// debug level.
pub fn parse(operation: Operation, body: &[u8]) -> Option<Message> {
    parse_at(operation, body, unix_now())
}

/// Like [`parse`], with an explicit wall clock (Unix seconds) for events that
/// carry no server timestamp.
pub fn parse_at(operation: Operation, body: &[u8], now: i64) -> Option<Message> {
    match try_parse(operation, body, now) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, len = body.len(), "discarding unparseable message");
            None
        }
    }
}

/// Like [`parse_at`] but reports malformed payloads.
///
/// # Errors
/// Returns [`ProtocolError::Json`] when the body is not JSON and
/// [`ProtocolError::Shape`] when it lacks a `cmd` or a required structure.
pub fn try_parse(
    operation: Operation,
    body: &[u8],
    now: i64,
) -> Result<Option<Message>, ProtocolError> {
    if operation != Operation::Message {
        // Heartbeat replies land here too: consumed, not an event.
        return Ok(None);
    }

    let root: Value = serde_json::from_slice(body)?;
    let Some(cmd) = root.get("cmd").and_then(Value::as_str) else {
        return Err(ProtocolError::Shape {
            cmd: String::new(),
            reason: "missing \"cmd\"".into(),
        });
    };
    let Some(command) = Command::from_cmd(cmd) else {
        tracing::trace!(cmd, "unhandled command");
        return Ok(None);
    };

    let base = |timestamp: i64| BaseMessage {
        cmd: cmd.to_string(),
        timestamp,
    };

    let msg = match command {
        Command::DanMu => Message::DanMu(danmu(&root, cmd)?),
        Command::SuperChat => Message::SuperChat(super_chat(&root, base(0))),
        Command::SendGift => Message::Gift(gift(&root, base(int(&root, "/data/timestamp")), false)),
        Command::ComboSend => Message::Gift(gift(&root, base(now), true)),
        Command::UserToast => Message::Guard(guard(&root, base(0))),
        Command::InteractWord => {
            Message::Entry(interact_word(&root, base(int(&root, "/data/timestamp"))))
        }
        Command::EntryEffect => Message::Entry(entry_effect(&root, base(now))),
        Command::RoomRealTimeUpdate => Message::RoomFans(RoomFansMessage {
            base: base(now),
            fans: int(&root, "/data/fans"),
            fans_club: int(&root, "/data/fans_club"),
        }),
        Command::OnlineRankCount => Message::RankCount(RankCountMessage {
            base: base(now),
            count: int(&root, "/data/count"),
        }),
        Command::HotRankChanged => Message::HotRank(HotRankMessage {
            base: base(int(&root, "/data/timestamp")),
            rank: int(&root, "/data/rank"),
            area: text(&root, "/data/area_name"),
        }),
        Command::Live | Command::Preparing => Message::LiveStatus(LiveStatusMessage {
            base: base(now),
            live: command == Command::Live,
        }),
        Command::RoomChange => Message::RoomChange(RoomChangeMessage {
            base: base(now),
            title: text(&root, "/data/title"),
            area_name: text(&root, "/data/area_name"),
            parent_area_name: text(&root, "/data/parent_area_name"),
        }),
        Command::WatchedChange => Message::WatchedChange(WatchedChangeMessage {
            base: base(now),
            num: int(&root, "/data/num"),
        }),
        Command::RoomBlack | Command::CutOff => return Ok(None),
    };
    Ok(Some(msg))
}

// ---------------------------------------------------------------------------
// Per-command extraction
// ---------------------------------------------------------------------------

/// `info` is positional:
/// `[0]` display attributes `[_, mode, font_size, color, ms_timestamp, ..]`,
/// `[1]` text, `[2]` sender `[uid, uname, ..]`, `[3]` badge
/// `[level, name, .., streamer_uid @ 12]` (empty when absent),
/// `[4]` `[live_level, ..]`.
fn danmu(root: &Value, cmd: &str) -> Result<DanMuMessage, ProtocolError> {
    let has_shape = root
        .get("info")
        .and_then(Value::as_array)
        .is_some_and(|info| info.len() >= 3 && info[0].is_array() && info[2].is_array());
    if !has_shape {
        return Err(ProtocolError::Shape {
            cmd: cmd.to_string(),
            reason: "\"info\" is not [attrs, text, sender, ..]".into(),
        });
    }

    Ok(DanMuMessage {
        base: BaseMessage {
            cmd: cmd.to_string(),
            timestamp: int(root, "/info/0/4") / 1000,
        },
        user: User {
            uid: int(root, "/info/2/0"),
            uname: text(root, "/info/2/1"),
        },
        medal: Medal {
            level: int(root, "/info/3/0"),
            name: text(root, "/info/3/1"),
            uid: int(root, "/info/3/12"),
        },
        live_level: int(root, "/info/4/0"),
        text: text(root, "/info/1"),
        mode: int(root, "/info/0/1"),
        font_size: int(root, "/info/0/2"),
        color: int(root, "/info/0/3"),
    })
}

fn super_chat(root: &Value, mut base: BaseMessage) -> SuperChatMessage {
    base.timestamp = int(root, "/data/start_time");
    SuperChatMessage {
        base,
        user: User {
            uid: int(root, "/data/uid"),
            uname: text(root, "/data/user_info/uname"),
        },
        medal: medal(root, "/data/medal_info"),
        live_level: int(root, "/data/user_info/user_level"),
        text: text(root, "/data/message"),
        // Already in currency units, unlike gifts.
        price: float(root, "/data/price"),
    }
}

fn gift(root: &Value, base: BaseMessage, combo: bool) -> GiftMessage {
    let (id, name, price, num) = if combo {
        ("/data/gift_id", "/data/gift_name", "/data/combo_total_coin", "/data/total_num")
    } else {
        ("/data/giftId", "/data/giftName", "/data/price", "/data/num")
    };
    GiftMessage {
        base,
        user: User {
            uid: int(root, "/data/uid"),
            uname: text(root, "/data/uname"),
        },
        medal: medal(root, "/data/medal_info"),
        gift_id: int(root, id),
        gift_name: text(root, name),
        price: float(root, price) / MONEY_SCALE,
        num: int(root, num),
        combo,
    }
}

fn guard(root: &Value, mut base: BaseMessage) -> GuardMessage {
    base.timestamp = int(root, "/data/start_time");
    GuardMessage {
        base,
        user: User {
            uid: int(root, "/data/uid"),
            uname: text(root, "/data/username"),
        },
        role_name: text(root, "/data/role_name"),
        price: float(root, "/data/price") / MONEY_SCALE,
    }
}

fn interact_word(root: &Value, base: BaseMessage) -> EntryMessage {
    EntryMessage {
        base,
        user: User {
            uid: int(root, "/data/uid"),
            uname: text(root, "/data/uname"),
        },
        medal: medal(root, "/data/fans_medal"),
    }
}

fn entry_effect(root: &Value, base: BaseMessage) -> EntryMessage {
    EntryMessage {
        base,
        user: User {
            uid: int(root, "/data/uid"),
            uname: name_from_copy_writing(&text(root, "/data/copy_writing")),
        },
        medal: Medal {
            level: ENTRY_EFFECT_MEDAL_LEVEL,
            ..Medal::default()
        },
    }
}

/// Cuts the viewer name out of an entry announcement. Announcements shorter
/// than prefix + suffix (+ at least no name) yield an empty name.
fn name_from_copy_writing(copy_writing: &str) -> String {
    let chars: Vec<char> = copy_writing.chars().collect();
    if chars.len() < 15 {
        return String::new();
    }
    chars[COPY_WRITING_PREFIX..chars.len() - COPY_WRITING_SUFFIX]
        .iter()
        .collect()
}

fn medal(root: &Value, pointer: &str) -> Medal {
    let Some(info) = root.pointer(pointer) else {
        return Medal::default();
    };
    Medal {
        level: int(info, "/medal_level"),
        uid: int(info, "/target_id"),
        name: text(info, "/medal_name"),
    }
}

// ---------------------------------------------------------------------------
// Lenient field access
// ---------------------------------------------------------------------------

fn int(value: &Value, pointer: &str) -> i64 {
    match value.pointer(pointer) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

fn float(value: &Value, pointer: &str) -> f64 {
    match value.pointer(pointer) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

fn text(value: &Value, pointer: &str) -> String {
    match value.pointer(pointer) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
