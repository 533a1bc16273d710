//! Storage boundary for recorded events.
//!
//! The monitor hands every event to a [`Store`] together with a snapshot of
//! the room it came from. Chat lines arrive in batches, everything else one
//! at a time.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use livechat_protocol::{DanMuMessage, Message, MessageKind, Room};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::{StorageBackend, StorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where events go.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Stores a batch of chat lines from one room.
    async fn insert_danmu(&self, room: &Room, batch: &[DanMuMessage]) -> Result<(), StoreError>;

    /// Stores any single non-chat event.
    async fn insert(&self, room: &Room, msg: &Message) -> Result<(), StoreError>;
}

/// One stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub room: Room,
    pub message: Message,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    room: &'a Room,
    message: &'a Message,
}

/// Builds the store selected by the config.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Jsonl => Ok(Arc::new(JsonLinesStore::open(&config.path).await?)),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored so far, in insertion order.
    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }

    pub async fn count(&self, kind: MessageKind) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.message.kind() == kind)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_danmu(&self, room: &Room, batch: &[DanMuMessage]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.extend(batch.iter().map(|m| Record {
            room: room.clone(),
            message: Message::DanMu(m.clone()),
        }));
        Ok(())
    }

    async fn insert(&self, room: &Room, msg: &Message) -> Result<(), StoreError> {
        self.records.lock().await.push(Record {
            room: room.clone(),
            message: msg.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonLinesStore
// ---------------------------------------------------------------------------

/// Appends `{"room": .., "message": ..}` lines to `<dir>/<kind>.jsonl`.
///
/// Files are opened lazily in append mode and kept open.
#[derive(Debug)]
pub struct JsonLinesStore {
    dir: PathBuf,
    files: Mutex<HashMap<MessageKind, File>>,
}

impl JsonLinesStore {
    /// Creates `dir` if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "jsonl store opened");
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, kind: MessageKind) -> PathBuf {
        self.dir.join(format!("{kind}.jsonl"))
    }

    async fn append(&self, kind: MessageKind, lines: &[u8]) -> Result<(), StoreError> {
        let mut files = self.files.lock().await;
        let file = match files.entry(kind) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path_for(kind))
                    .await?;
                entry.insert(file)
            }
        };
        file.write_all(lines).await?;
        file.flush().await?;
        Ok(())
    }
}

fn push_line(buf: &mut Vec<u8>, room: &Room, message: &Message) -> Result<(), StoreError> {
    serde_json::to_writer(&mut *buf, &RecordRef { room, message })?;
    buf.push(b'\n');
    Ok(())
}

#[async_trait]
impl Store for JsonLinesStore {
    async fn insert_danmu(&self, room: &Room, batch: &[DanMuMessage]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for m in batch {
            push_line(&mut buf, room, &Message::DanMu(m.clone()))?;
        }
        self.append(MessageKind::DanMu, &buf).await
    }

    async fn insert(&self, room: &Room, msg: &Message) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        push_line(&mut buf, room, msg)?;
        self.append(msg.kind(), &buf).await
    }
}

#[cfg(test)]
mod tests {
    use livechat_protocol::{BaseMessage, RankCountMessage, User};

    use super::*;

    fn room() -> Room {
        Room {
            id: 6,
            real_id: 7734200,
            ..Room::default()
        }
    }

    fn danmu(text: &str) -> DanMuMessage {
        DanMuMessage {
            base: BaseMessage {
                cmd: "DANMU_MSG".into(),
                timestamp: 1,
            },
            user: User {
                uid: 1,
                uname: "viewer".into(),
            },
            text: text.into(),
            ..DanMuMessage::default()
        }
    }

    fn rank(count: i64) -> Message {
        Message::RankCount(RankCountMessage {
            base: BaseMessage {
                cmd: "ONLINE_RANK_COUNT".into(),
                timestamp: 2,
            },
            count,
        })
    }

    #[tokio::test]
    async fn test_memory_store_keeps_order_and_kind() {
        let store = MemoryStore::new();
        store.insert_danmu(&room(), &[danmu("a"), danmu("b")]).await.unwrap();
        store.insert(&room(), &rank(3)).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(store.count(MessageKind::DanMu).await, 2);
        assert_eq!(store.count(MessageKind::RankCount).await, 1);
        assert_eq!(records[0].room, room());
    }

    #[tokio::test]
    async fn test_jsonl_store_writes_one_file_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesStore::open(dir.path().join("nested")).await.unwrap();

        store.insert_danmu(&room(), &[danmu("hi"), danmu("there")]).await.unwrap();
        store.insert(&room(), &rank(9)).await.unwrap();
        store.insert(&room(), &rank(10)).await.unwrap();

        let danmu_lines = std::fs::read_to_string(store.path_for(MessageKind::DanMu)).unwrap();
        let records: Vec<Record> = danmu_lines
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].message, Message::DanMu(danmu("there")));
        assert_eq!(records[0].room.real_id, 7734200);

        let rank_lines = std::fs::read_to_string(dir.path().join("nested/rank_count.jsonl")).unwrap();
        assert_eq!(rank_lines.lines().count(), 2);
        let last: serde_json::Value = serde_json::from_str(rank_lines.lines().last().unwrap()).unwrap();
        assert_eq!(last["message"]["kind"], "rank_count");
        assert_eq!(last["message"]["count"], 10);
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonLinesStore::open(dir.path()).await.unwrap();
            store.insert(&room(), &rank(1)).await.unwrap();
        }
        let store = JsonLinesStore::open(dir.path()).await.unwrap();
        store.insert(&room(), &rank(2)).await.unwrap();

        let lines = std::fs::read_to_string(store.path_for(MessageKind::RankCount)).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Jsonl,
            path: dir.path().join("out"),
        };
        let store = open_store(&config).await.unwrap();
        store.insert(&room(), &rank(1)).await.unwrap();
        assert!(dir.path().join("out/rank_count.jsonl").exists());
    }
}
