//! Chat connection: join handshake, heartbeat and read loop.
//!
//! A [`ProtocolClient`] owns one transport for one room. After the join
//! reply arrives it runs two tasks side by side:
//!   1. Heartbeat: sends the fixed control frame now and every interval.
//!   2. Read loop: feeds every received frame into the ingestion pipeline.
//!
//! Closing the transport is the only cancellation signal. It unblocks the
//! read loop, which closes the pipeline, which ends the consumer's stream.

use std::sync::Arc;
use std::time::Duration;

use livechat_protocol::{Message, Operation, ProtocolError, Room, Version, decode, encode};
use livechat_transport::{Connection, DEFAULT_HEADERS, TransportError, WebSocketConnection};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{Instrument, Span, debug, info, trace, warn};

use crate::pipeline::{self, Counters, PipelineInput, PipelineMetrics};
use crate::{ClientConfig, ClientError, ClientState, ServerInfo};

/// Heartbeat body: "R3" seven times. The server only checks that one
/// arrives.
pub const HEARTBEAT_BODY: &[u8; 14] = b"R3R3R3R3R3R3R3";

/// Protocol version advertised in the join request (brotli batches).
const PROTOVER: u32 = 3;

#[derive(Serialize)]
struct JoinRequest<'a> {
    platform: &'static str,
    protover: u32,
    uid: i64,
    roomid: i64,
    #[serde(rename = "type")]
    kind: u32,
    key: &'a str,
}

/// Builds the join-room frame for `room_id` with the server-issued `token`.
pub fn join_frame(room_id: i64, token: &str) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(&JoinRequest {
        platform: "web",
        protover: PROTOVER,
        uid: 0,
        roomid: room_id,
        kind: 2,
        key: token,
    })?;
    encode(Version::Plain, Operation::JoinRoom, &body)
}

pub fn heartbeat_frame() -> Result<Vec<u8>, ProtocolError> {
    encode(Version::Control, Operation::Heartbeat, HEARTBEAT_BODY)
}

// ---------------------------------------------------------------------------
// ProtocolClient
// ---------------------------------------------------------------------------

/// One room's chat connection.
///
/// The outbound message queue exists from construction, so a consumer can
/// [`take_messages`](Self::take_messages) before or after connecting. The
/// stream ends when the client is closed, or dropped without ever becoming
/// active.
pub struct ProtocolClient<C = WebSocketConnection>
where
    C: Connection<Error = TransportError>,
{
    room: Room,
    server: ServerInfo,
    config: ClientConfig,
    state: Arc<watch::Sender<ClientState>>,
    conn: Option<Arc<C>>,
    output: Option<mpsc::Sender<Message>>,
    messages: Option<mpsc::Receiver<Message>>,
    counters: Arc<Counters>,
    heartbeat: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stages: Vec<JoinHandle<()>>,
    span: Span,
}

impl<C: Connection<Error = TransportError>> ProtocolClient<C> {
    pub fn new(room: Room, server: ServerInfo, config: ClientConfig) -> Self {
        let config = config.validated();
        let (output, messages) = mpsc::channel(config.message_queue_capacity());
        let (state, _) = watch::channel(ClientState::Disconnected);
        let span = tracing::info_span!("chat", room_id = room.id, liver = %room.liver.uname);

        Self {
            room,
            server,
            config,
            state: Arc::new(state),
            conn: None,
            output: Some(output),
            messages: Some(messages),
            counters: Arc::default(),
            heartbeat: None,
            reader: None,
            stages: Vec::new(),
            span,
        }
    }

    /// Joins over an already-open transport.
    ///
    /// # Errors
    /// [`ClientError::InvalidState`] unless the client is `Disconnected`;
    /// otherwise see [`connect`](ProtocolClient::connect).
    pub async fn connect_with(&mut self, conn: C) -> Result<(), ClientError> {
        self.transition(ClientState::Connecting, "connect")?;
        self.establish(conn).await
    }

    /// `Connecting → Verifying → Active`, or back to `Disconnected` with the
    /// transport closed.
    async fn establish(&mut self, conn: C) -> Result<(), ClientError> {
        self.transition(ClientState::Verifying, "verify")?;

        let joined = verify(&conn, self.join_room_id(), &self.server.token)
            .instrument(self.span.clone())
            .await;
        if let Err(e) = joined {
            warn!(parent: &self.span, error = %e, "join failed");
            if let Err(close_err) = conn.close().await {
                debug!(parent: &self.span, error = %close_err, "close after failed join");
            }
            self.transition(ClientState::Disconnected, "verify")?;
            return Err(e);
        }

        self.transition(ClientState::Active, "verify")?;
        self.start(Arc::new(conn));
        info!(parent: &self.span, "joined");
        Ok(())
    }

    fn start(&mut self, conn: Arc<C>) {
        let Some(output) = self.output.take() else {
            return;
        };
        let (input, stages) = pipeline::spawn(
            self.config.queue_capacity,
            output,
            Arc::clone(&self.counters),
            &self.span,
        );
        self.stages = stages;
        self.heartbeat = Some(tokio::spawn(
            heartbeat_loop(Arc::clone(&conn), self.config.heartbeat_interval())
                .instrument(self.span.clone()),
        ));
        self.reader = Some(tokio::spawn(
            read_loop(Arc::clone(&conn), input, Arc::clone(&self.state))
                .instrument(self.span.clone()),
        ));
        self.conn = Some(conn);
    }

    /// Closes the transport and waits for the read loop and pipeline to
    /// drain. Always leaves the client `Closed`.
    ///
    /// # Errors
    /// Returns the transport's close error, after cleanup has finished.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let closed = match &self.conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.state.send_replace(ClientState::Closed);
        // Ends the stream for a consumer of a client that never went active.
        self.output = None;

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!(parent: &self.span, error = %e, "read loop task failed");
            }
        }
        for stage in std::mem::take(&mut self.stages) {
            if let Err(e) = stage.await {
                warn!(parent: &self.span, error = %e, "pipeline task failed");
            }
        }
        info!(parent: &self.span, "disconnected");
        closed.map_err(ClientError::from)
    }

    /// Hands out the outbound message queue. Returns `None` after the first
    /// call.
    pub fn take_messages(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.messages.take()
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change, including the read loop
    /// ending on its own.
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.counters.snapshot()
    }

    /// The span all of this client's tasks log under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The server only accepts the canonical id; fall back to the display
    /// id when the lookup did not provide one.
    fn join_room_id(&self) -> i64 {
        if self.room.real_id != 0 {
            self.room.real_id
        } else {
            self.room.id
        }
    }

    fn transition(&self, target: ClientState, op: &'static str) -> Result<(), ClientError> {
        let current = self.state();
        if !current.can_transition_to(target) {
            return Err(ClientError::InvalidState { op, state: current });
        }
        self.state.send_replace(target);
        debug!(parent: &self.span, from = %current, to = %target, "state change");
        Ok(())
    }
}

impl ProtocolClient<WebSocketConnection> {
    /// Dials the chat server and joins the room.
    ///
    /// # Errors
    /// - [`ClientError::InvalidState`] unless the client is `Disconnected`.
    /// - [`ClientError::Transport`] if the dial fails or times out.
    /// - [`ClientError::Verification`] if the server rejects the join.
    ///
    /// On any error the client is back in `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.transition(ClientState::Connecting, "connect")?;
        info!(parent: &self.span, url = %self.server.url, "connecting");

        let dialed = WebSocketConnection::connect(
            &self.server.url,
            DEFAULT_HEADERS,
            self.config.handshake_timeout(),
        )
        .await;
        match dialed {
            Ok(conn) => self.establish(conn).await,
            Err(e) => {
                warn!(parent: &self.span, error = %e, "dial failed");
                self.transition(ClientState::Disconnected, "connect")?;
                Err(e.into())
            }
        }
    }
}

impl<C: Connection<Error = TransportError>> Drop for ProtocolClient<C> {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        // Aborting the reader drops the pipeline input and closes the stream.
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Sends the join request and performs exactly one read.
async fn verify<C>(conn: &C, room_id: i64, token: &str) -> Result<(), ClientError>
where
    C: Connection<Error = TransportError>,
{
    conn.send(&join_frame(room_id, token)?).await?;

    let Some(reply) = conn.recv().await? else {
        return Err(TransportError::ConnectionClosed("closed before join reply".into()).into());
    };
    let frame = decode(&reply)?;
    if frame.operation() != Operation::JoinRoomReply {
        return Err(ClientError::Verification(
            String::from_utf8_lossy(frame.body).into_owned(),
        ));
    }
    debug!(room_id, "join accepted");
    Ok(())
}

/// Stops at the first failed write. The read loop keeps running until the
/// server drops the connection.
async fn heartbeat_loop<C>(conn: Arc<C>, every: Duration)
where
    C: Connection<Error = TransportError>,
{
    let frame = match heartbeat_frame() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "cannot build heartbeat");
            return;
        }
    };
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = conn.send(&frame).await {
            warn!(error = %e, "heartbeat failed, stopping");
            return;
        }
        trace!("heartbeat sent");
    }
}

async fn read_loop<C>(conn: Arc<C>, input: PipelineInput, state: Arc<watch::Sender<ClientState>>)
where
    C: Connection<Error = TransportError>,
{
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => input.push(frame),
            Ok(None) => {
                info!("connection closed");
                break;
            }
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "read error, continuing");
            }
            Err(e) => {
                warn!(error = %e, "read failed, stopping");
                break;
            }
        }
    }
    drop(input);
    state.send_if_modified(|s| {
        if *s == ClientState::Active {
            *s = ClientState::Closed;
            true
        } else {
            false
        }
    });
}
