//! # Request/response socket
//!
//! [`RpcSocket`] owns one WebSocket connection, split into reader and writer
//! halves. The writer is shared behind a tokio `Mutex` so requests can be
//! sent concurrently with incoming metric traffic. A background reader task
//! dispatches:
//!
//! - **Responses** (frames with a numeric `id`) to the pending `oneshot`
//!   channel registered for that id
//! - **Events** to the [`PayloadSink`], after the transport's
//!   [`EventRouter`] has extracted the subscription id and payload
//!
//! When the remote side closes the socket or a read fails, every pending
//! request is failed and the [`CloseSink`] is told once. Closing from our
//! side with [`RpcSocket::close`] stays silent.
//!
//! Both transports share this type; they differ only in URL, params and
//! the shape of their event frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{CloseSink, PayloadSink};
use crate::error::{NotionError, NotionResult};
use crate::protocol::{RpcRequest, RpcResponse};

/// Write half of the WebSocket connection.
type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of the WebSocket connection.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A request awaiting its matching response by `id`.
type PendingResponse = oneshot::Sender<NotionResult<serde_json::Value>>;

type PendingMap = Arc<Mutex<HashMap<u64, PendingResponse>>>;

/// Extracts `(subscription id, payload)` from an event frame.
///
/// Returns `None` for frames the transport does not recognize.
pub(crate) type EventRouter = fn(serde_json::Value) -> Option<(String, serde_json::Value)>;

/// Connection parameters shared by both transports.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

/// One open request/response WebSocket.
pub(crate) struct RpcSocket {
    url: String,
    writer: Arc<Mutex<WsWriter>>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    reader_running: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl RpcSocket {
    /// Open a connection to `url` and start the reader task.
    ///
    /// # Errors
    /// Returns [`NotionError::Timeout`] if the handshake exceeds the connect
    /// timeout, or [`NotionError::ConnectionFailed`] if it fails.
    pub(crate) async fn open(
        url: &str,
        options: &SocketOptions,
        router: EventRouter,
        sink: PayloadSink,
        on_close: CloseSink,
    ) -> NotionResult<Self> {
        let (ws, response) = tokio::time::timeout(
            options.connect_timeout,
            handshake(url, options.accept_invalid_certs),
        )
        .await
        .map_err(|_| NotionError::Timeout {
            seconds: options.connect_timeout.as_secs(),
        })?
        .map_err(|e| NotionError::ConnectionFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(url, status = %response.status(), "WebSocket connected");

        let (writer, reader) = ws.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_running = Arc::new(AtomicBool::new(true));

        let reader_handle = spawn_reader_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&reader_running),
            router,
            sink,
            on_close,
        );

        Ok(Self {
            url: url.to_string(),
            writer: Arc::new(Mutex::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            reader_handle: std::sync::Mutex::new(Some(reader_handle)),
            reader_running,
            request_timeout: options.request_timeout,
        })
    }

    /// URL this socket is connected to.
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Whether the reader task is still running.
    pub(crate) fn is_open(&self) -> bool {
        self.reader_running.load(Ordering::SeqCst)
    }

    /// Send a request and wait for the matching response.
    pub(crate) async fn call(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> NotionResult<serde_json::Value> {
        if !self.is_open() {
            return Err(NotionError::ConnectionLost {
                reason: "socket is closed".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        tracing::debug!(method, id, json = %json, "Sending request");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Text(json.into())).await {
                self.pending.lock().await.remove(&id);
                return Err(NotionError::WebSocket(format!("Send error: {e}")));
            }
        }

        let seconds = self.request_timeout.as_secs();
        let result = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(received) => received.map_err(|_| NotionError::ConnectionLost {
                reason: "Response channel dropped (reader loop died)".into(),
            })?,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(NotionError::Timeout { seconds });
            }
        }?;

        tracing::debug!(method, id, "Request succeeded");
        Ok(result)
    }

    /// Stop the reader task and close the connection.
    pub(crate) async fn close(&self) {
        self.reader_running.store(false, Ordering::SeqCst);
        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }

        fail_pending(&self.pending, || NotionError::ConnectionLost {
            reason: "socket closed by client".into(),
        })
        .await;

        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
        tracing::debug!(url = %self.url, "WebSocket closed");
    }
}

impl Drop for RpcSocket {
    fn drop(&mut self) {
        self.reader_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .reader_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

// ─── Slot ───────────────────────────────────────────────────────────────

/// The current socket of a transport, replaced on connect and taken on
/// disconnect.
#[derive(Default)]
pub(crate) struct SocketSlot(RwLock<Option<Arc<RpcSocket>>>);

impl SocketSlot {
    /// The open socket, or [`NotionError::NotConnected`].
    pub(crate) async fn get(&self) -> NotionResult<Arc<RpcSocket>> {
        match self.0.read().await.as_ref() {
            Some(socket) if socket.is_open() => Ok(Arc::clone(socket)),
            Some(_) => Err(NotionError::ConnectionLost {
                reason: "socket is closed".into(),
            }),
            None => Err(NotionError::NotConnected),
        }
    }

    /// Whether an open socket is installed.
    pub(crate) async fn is_open(&self) -> bool {
        self.0.read().await.as_ref().is_some_and(|s| s.is_open())
    }

    /// Install `socket`, closing any previous one.
    pub(crate) async fn replace(&self, socket: RpcSocket) {
        let previous = self.0.write().await.replace(Arc::new(socket));
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    /// Remove and close the current socket. Returns `false` if none was set.
    pub(crate) async fn close(&self) -> bool {
        let current = self.0.write().await.take();
        match current {
            Some(socket) => {
                socket.close().await;
                true
            }
            None => false,
        }
    }
}

// ─── Internals ──────────────────────────────────────────────────────────

#[cfg(any(feature = "native-tls", feature = "rustls-tls"))]
async fn handshake(
    url: &str,
    accept_invalid_certs: bool,
) -> NotionResult<(
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    tokio_tungstenite::tungstenite::handshake::client::Response,
)> {
    let connector = super::tls::connector(accept_invalid_certs)?;
    Ok(tokio_tungstenite::connect_async_tls_with_config(url, None, true, connector).await?)
}

#[cfg(not(any(feature = "native-tls", feature = "rustls-tls")))]
async fn handshake(
    url: &str,
    _accept_invalid_certs: bool,
) -> NotionResult<(
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    tokio_tungstenite::tungstenite::handshake::client::Response,
)> {
    Ok(tokio_tungstenite::connect_async(url).await?)
}

async fn fail_pending(pending: &PendingMap, error: impl Fn() -> NotionError) {
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(error()));
    }
}

fn spawn_reader_loop(
    mut reader: WsReader,
    pending: PendingMap,
    running: Arc<AtomicBool>,
    router: EventRouter,
    sink: PayloadSink,
    on_close: CloseSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lost: Option<String> = None;

        while running.load(Ordering::SeqCst) {
            let msg = tokio::select! {
                msg = reader.next() => msg,
                () = tokio::time::sleep(Duration::from_millis(100)) => continue,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(raw = %text, "Reader loop received message");

                    let value: serde_json::Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse WebSocket message as JSON");
                            continue;
                        }
                    };

                    if let Some(id) = value.get("id").and_then(serde_json::Value::as_u64) {
                        deliver_response(&pending, id, value).await;
                        continue;
                    }

                    match router(value) {
                        Some((subscription_id, payload)) => sink(&subscription_id, &payload),
                        None => tracing::debug!("Ignoring unrecognized event frame"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("WebSocket closed by server");
                    fail_pending(&pending, || NotionError::ConnectionLost {
                        reason: "WebSocket closed by server".into(),
                    })
                    .await;
                    lost = Some("closed by server".into());
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    let reason = e.to_string();
                    fail_pending(&pending, || NotionError::WebSocket(reason.clone())).await;
                    lost = Some(reason);
                    break;
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    fail_pending(&pending, || NotionError::ConnectionLost {
                        reason: "WebSocket stream ended".into(),
                    })
                    .await;
                    lost = Some("stream ended".into());
                    break;
                }
                _ => {}
            }
        }

        tracing::debug!("Reader loop exiting");
        // a close we asked for has already cleared the flag
        if let (true, Some(reason)) = (running.swap(false, Ordering::SeqCst), lost) {
            on_close(&reason);
        }
    })
}

async fn deliver_response(pending: &PendingMap, id: u64, value: serde_json::Value) {
    let Some(tx) = pending.lock().await.remove(&id) else {
        tracing::debug!(id, "Received response for unknown request ID");
        return;
    };

    let result = match serde_json::from_value::<RpcResponse>(value) {
        Ok(RpcResponse {
            error: Some(error), ..
        }) => {
            tracing::warn!(id, code = error.code, message = %error.message, "Error response");
            Err(NotionError::from_api_error(error.code, error.message))
        }
        Ok(RpcResponse { result, .. }) => Ok(result.unwrap_or(serde_json::Value::Null)),
        Err(e) => Err(NotionError::ProtocolError {
            reason: format!("Failed to parse response: {e}"),
        }),
    };
    let _ = tx.send(result);
}
