//! Multi-room orchestration.
//!
//! A [`Monitor`] owns one [`ProtocolClient`] per room and one worker task per
//! connected room. The worker drains the client's message queue, batches chat
//! lines through a [`BatchBuffer`] and hands everything else to the [`Store`]
//! as it arrives.

use std::sync::Arc;

use livechat_batch::{BatchBuffer, BatchConfig};
use livechat_client::{ApiClient, ClientError, ClientState, ProtocolClient};
use livechat_protocol::{DanMuMessage, Message, Room};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::LivechatError;
use crate::store::Store;

/// One monitored room.
struct Entry {
    client: ProtocolClient,
    /// The monitor's view of the room, kept current by its worker.
    room: Arc<RwLock<Room>>,
    worker: Option<JoinHandle<()>>,
}

pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn Store>,
    entries: Vec<Entry>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            entries: Vec::new(),
        }
    }

    /// Resolves each room id into a client and registers it.
    ///
    /// # Errors
    /// The first failed lookup. Rooms resolved before it stay registered.
    pub async fn prepare(&mut self, api: &ApiClient, rooms: &[i64]) -> Result<(), ClientError> {
        for &room_id in rooms {
            let client = api.chat_client(room_id).await.inspect_err(|e| {
                error!(room_id, error = %e, "failed to resolve room");
            })?;
            self.add_client(client);
        }
        Ok(())
    }

    /// Registers an already-built client. It is connected by the next
    /// [`start`](Self::start).
    pub fn add_client(&mut self, client: ProtocolClient) {
        let room = Arc::new(RwLock::new(client.room().clone()));
        self.entries.push(Entry {
            client,
            room,
            worker: None,
        });
    }

    /// Connects every registered client that is not yet running, pausing
    /// `connect_stagger` between attempts.
    ///
    /// A room that fails to connect or join is logged and skipped. Returns
    /// how many rooms this call brought up.
    pub async fn start(&mut self) -> usize {
        let stagger = self.config.connect_stagger();
        let mut attempted = false;
        let mut started = 0;

        for entry in &mut self.entries {
            if entry.worker.is_some() || entry.client.state() != ClientState::Disconnected {
                continue;
            }
            if attempted && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            attempted = true;

            let room_id = entry.client.room().id;
            if let Err(e) = entry.client.connect().await {
                error!(room_id, error = %e, "failed to connect, skipping room");
                continue;
            }
            let Some(messages) = entry.client.take_messages() else {
                warn!(room_id, "message queue already taken, skipping room");
                continue;
            };

            let span = entry.client.span().clone();
            {
                let room = entry.room.read().await;
                info!(
                    parent: &span,
                    live = room.is_live,
                    title = %room.title,
                    "monitoring room"
                );
            }
            let worker = run_worker(
                messages,
                Arc::clone(&entry.room),
                Arc::clone(&self.store),
                self.config.danmu_batch(),
                span.clone(),
            );
            entry.worker = Some(tokio::spawn(worker.instrument(span)));
            started += 1;
        }

        info!(started, rooms = self.entries.len(), "monitor started");
        started
    }

    /// Disconnects every client, then waits for each worker to store what it
    /// still holds.
    pub async fn stop(&mut self) {
        info!(rooms = self.entries.len(), "stopping monitor");
        for entry in &mut self.entries {
            if let Err(e) = entry.client.disconnect().await {
                warn!(room_id = entry.client.room().id, error = %e, "disconnect failed");
            }
        }
        for entry in &mut self.entries {
            if let Some(worker) = entry.worker.take() {
                if let Err(e) = worker.await {
                    error!(room_id = entry.client.room().id, error = %e, "worker task failed");
                }
            }
        }
    }

    /// Runs until Ctrl-C, then stops cleanly.
    ///
    /// # Errors
    /// [`LivechatError::Signal`] if the signal handler cannot be installed.
    /// The monitor is stopped either way.
    pub async fn run_until_ctrl_c(&mut self) -> Result<(), LivechatError> {
        if self.start().await == 0 {
            warn!("no room is connected");
        }
        let signal = tokio::signal::ctrl_c().await;
        info!("shutting down");
        self.stop().await;
        signal.map_err(LivechatError::Signal)
    }

    /// Current view of every registered room.
    pub async fn rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            rooms.push(entry.room.read().await.clone());
        }
        rooms
    }

    /// Rooms whose client is currently active.
    pub fn active_rooms(&self) -> usize {
        self.entries.iter().filter(|e| e.client.state().is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker(
    mut messages: mpsc::Receiver<Message>,
    room: Arc<RwLock<Room>>,
    store: Arc<dyn Store>,
    batch: BatchConfig,
    span: Span,
) {
    let danmu = {
        let room = Arc::clone(&room);
        let store = Arc::clone(&store);
        BatchBuffer::new(batch, move |items: Vec<DanMuMessage>| {
            let room = Arc::clone(&room);
            let store = Arc::clone(&store);
            async move {
                let snapshot = room.read().await.clone();
                if let Err(e) = store.insert_danmu(&snapshot, &items).await {
                    error!(error = %e, count = items.len(), "failed to store chat batch");
                }
            }
            .instrument(span.clone())
        })
    };

    while let Some(msg) = messages.recv().await {
        match msg {
            Message::DanMu(m) => danmu.put(m).await,
            Message::LiveStatus(ref status) => {
                let mut room = room.write().await;
                room.apply(&msg);
                if status.live {
                    info!(liver = %room.liver.uname, "on air");
                } else {
                    info!(liver = %room.liver.uname, "off air");
                }
            }
            Message::RoomChange(_) => {
                // Stored against the room as it was before the change.
                let snapshot = room.read().await.clone();
                insert(store.as_ref(), &snapshot, &msg).await;
                room.write().await.apply(&msg);
            }
            other => {
                let snapshot = room.read().await.clone();
                insert(store.as_ref(), &snapshot, &other).await;
            }
        }
    }

    danmu.must_flush().await;
    danmu.free().await;
    info!("worker finished");
}

async fn insert(store: &dyn Store, room: &Room, msg: &Message) {
    if let Err(e) = store.insert(room, msg).await {
        error!(error = %e, kind = %msg.kind(), "failed to store event");
    }
}
