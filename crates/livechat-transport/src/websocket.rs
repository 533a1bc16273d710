//! WebSocket client transport using `tokio-tungstenite`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Request headers the chat servers expect from a browser client.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    ("origin", "https://live.bilibili.com"),
    ("cache-control", "no-cache"),
    ("accept-language", "zh-CN,zh;q=0.9"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/102.0.0.0 Safari/537.36",
    ),
];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A client-side WebSocket connection.
///
/// The socket is split so that writes (heartbeats) and reads (the read loop)
/// lock different halves and never wait on each other.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    stream: Arc<Mutex<SplitStream<WsStream>>>,
    closed: watch::Sender<bool>,
}

impl WebSocketConnection {
    /// Dials `url`, sending `headers` with the upgrade request.
    ///
    /// The whole opening handshake (TCP, TLS, HTTP upgrade) must finish within
    /// `handshake_timeout`.
    pub async fn connect(
        url: &str,
        headers: &[(&str, &str)],
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            url: url.to_string(),
            reason,
        };

        let mut request = url
            .into_client_request()
            .map_err(|e| connect_failed(e.to_string()))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| connect_failed(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| connect_failed(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) =
            tokio::time::timeout(handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout(handshake_timeout))?
                .map_err(|e| connect_failed(e.to_string()))?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, url, "WebSocket connected");

        let (sink, stream) = ws.split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            id,
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
            closed,
        })
    }

    /// Whether [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }

        let mut stream = self.stream.lock().await;
        loop {
            let msg = tokio::select! {
                msg = stream.next() => msg,
                _ = closed.wait_for(|closed| *closed) => return Ok(None),
            };
            match msg {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(WsError::Capacity(e))) => {
                    return Err(TransportError::MalformedFrame(e.to_string()));
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        tracing::debug!(id = %self.id, "closing WebSocket");
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
