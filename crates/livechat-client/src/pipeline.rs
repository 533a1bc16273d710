//! Ingestion pipeline: raw frames → packets → messages.
//!
//! ```text
//! read loop ─▶ [raw] ─▶ unpack ─▶ [packets] ─▶ parse ─▶ [messages] ─▶ consumer
//! ```
//!
//! Every hand-off is a `try_send`: when the next queue is full the item is
//! dropped, counted and logged, so a slow consumer can never stall the read
//! loop (and with it the heartbeat). Dropping a stage's sender closes the
//! next queue, so closure flows forward to the consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use livechat_protocol::{Message, Operation, Packet, parser, unpack};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, trace, warn};

/// Snapshot of per-stage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub frames_received: u64,
    /// Raw frames dropped because the unpack queue was full.
    pub frames_dropped: u64,
    /// Packets dropped because the parse queue was full.
    pub packets_dropped: u64,
    /// Messages dropped because the consumer queue was full.
    pub messages_dropped: u64,
    pub messages_delivered: u64,
    /// Last popularity value carried by a heartbeat reply.
    pub popularity: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    packets_dropped: AtomicU64,
    messages_dropped: AtomicU64,
    messages_delivered: AtomicU64,
    popularity: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> PipelineMetrics {
        PipelineMetrics {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            popularity: self.popularity.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of handing one item to the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Sent,
    Dropped,
    /// The receiving stage is gone.
    Closed,
}

/// Non-blocking enqueue with drop-on-full.
fn offer<T>(tx: &mpsc::Sender<T>, item: T, stage: &'static str, dropped: &AtomicU64) -> Offer {
    match tx.try_send(item) {
        Ok(()) => Offer::Sent,
        Err(TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(stage, dropped = total, "queue full, dropping");
            Offer::Dropped
        }
        Err(TrySendError::Closed(_)) => Offer::Closed,
    }
}

/// The read loop's end of the pipeline. Dropping it closes the raw queue.
pub(crate) struct PipelineInput {
    tx: mpsc::Sender<Vec<u8>>,
    counters: Arc<Counters>,
}

impl PipelineInput {
    pub(crate) fn push(&self, frame: Vec<u8>) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        offer(&self.tx, frame, "unpack", &self.counters.frames_dropped);
    }
}

/// Spawns the unpack and parse stages feeding `output`.
pub(crate) fn spawn(
    capacity: usize,
    output: mpsc::Sender<Message>,
    counters: Arc<Counters>,
    span: &Span,
) -> (PipelineInput, Vec<JoinHandle<()>>) {
    let (raw_tx, raw_rx) = mpsc::channel(capacity);
    let (packet_tx, packet_rx) = mpsc::channel(capacity);

    let unpack_task = tokio::spawn(
        unpack_stage(raw_rx, packet_tx, Arc::clone(&counters)).instrument(span.clone()),
    );
    let parse_task = tokio::spawn(
        parse_stage(packet_rx, output, Arc::clone(&counters)).instrument(span.clone()),
    );

    let input = PipelineInput {
        tx: raw_tx,
        counters,
    };
    (input, vec![unpack_task, parse_task])
}

async fn unpack_stage(
    mut rx: mpsc::Receiver<Vec<u8>>,
    tx: mpsc::Sender<Packet>,
    counters: Arc<Counters>,
) {
    'frames: while let Some(frame) = rx.recv().await {
        for packet in unpack(&frame) {
            if offer(&tx, packet, "parse", &counters.packets_dropped) == Offer::Closed {
                break 'frames;
            }
        }
    }
    trace!("unpack stage finished");
}

async fn parse_stage(
    mut rx: mpsc::Receiver<Packet>,
    tx: mpsc::Sender<Message>,
    counters: Arc<Counters>,
) {
    while let Some(packet) = rx.recv().await {
        if packet.operation == Operation::HeartbeatReply {
            if let Some(popularity) = packet.popularity() {
                counters
                    .popularity
                    .store(u64::from(popularity), Ordering::Relaxed);
                trace!(popularity, "heartbeat reply");
            }
            continue;
        }
        let Some(msg) = parser::parse(packet.operation, &packet.body) else {
            continue;
        };
        match offer(&tx, msg, "consumer", &counters.messages_dropped) {
            Offer::Sent => {
                counters.messages_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Offer::Dropped => {}
            Offer::Closed => break,
        }
    }
    trace!("parse stage finished");
}
