//! WebSocket client hub: accept loop, client registry and fan-out.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Keeping the set of connected clients.
//! 4. Broadcasting serial output to every client as a text frame.
//! 5. Forwarding client text frames to the serial write path.
//! 6. Pinging clients periodically and dropping the ones that go quiet.
//! 7. Closing every client when the hub shuts down.
//!
//! # Client lifecycle
//!
//! Each connection runs in its own Tokio task.  Its write half (the sink)
//! lives in the shared registry so that broadcasts can reach it; its read
//! half stays in the task.  Removing a client from the registry drops the
//! registry's eviction sender, which wakes the task and ends the session.
//! A client that fails a send is therefore disconnected without affecting
//! anyone else.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt};
use serialws_core::{frame_text, BridgeConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::application::ports::{FrameBroadcaster, SerialWriter, SetupError};

/// Identifies one connected client for its whole session.
pub type ClientId = Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Timing and framing parameters for a [`ClientHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    /// Strip one trailing line terminator from each broadcast chunk.
    pub strip_newline: bool,
    /// A client that sends nothing (not even a pong) for this long is dropped.
    pub idle_timeout: Duration,
    /// How often every client is pinged.
    pub ping_interval: Duration,
    /// Upper bound on one send to one client.
    pub send_timeout: Duration,
    /// Upper bound on the WebSocket upgrade handshake.
    pub handshake_timeout: Duration,
}

impl HubSettings {
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            strip_newline: config.strip_newline,
            ..Self::default()
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            strip_newline: true,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            ping_interval: Self::DEFAULT_PING_INTERVAL,
            send_timeout: Self::DEFAULT_SEND_TIMEOUT,
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A registered client: where to send, and how to evict.
struct ClientConnection<S = WsSink> {
    peer: SocketAddr,
    sink: S,
    /// Dropping this ends the client's session task.
    _evict: oneshot::Sender<()>,
}

/// Sends `msg` to every client at once; removes and returns the ones that
/// failed.
///
/// A send that errors or exceeds `send_timeout` counts as a failure.  Sends
/// run concurrently, so a stalled client costs the others nothing.
async fn deliver<S>(
    clients: &mut HashMap<ClientId, ClientConnection<S>>,
    msg: &WsMessage,
    send_timeout: Duration,
) -> Vec<ClientId>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let sends = clients.iter_mut().map(|(id, conn)| {
        let msg = msg.clone();
        async move {
            match timeout(send_timeout, conn.sink.send(msg)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!("client {id} ({}): send failed: {e}", conn.peer);
                    Some(*id)
                }
                Err(_) => {
                    warn!("client {id} ({}): send timed out after {send_timeout:?}", conn.peer);
                    Some(*id)
                }
            }
        }
    });

    let failed: Vec<ClientId> = join_all(sends).await.into_iter().flatten().collect();

    for id in &failed {
        clients.remove(id);
    }

    failed
}

// ── Hub ───────────────────────────────────────────────────────────────────────

/// Accepts WebSocket clients and bridges them to the serial write path.
pub struct ClientHub {
    local_addr: SocketAddr,
    listener: std::sync::Mutex<Option<TcpListener>>,
    settings: HubSettings,
    clients: Mutex<HashMap<ClientId, ClientConnection>>,
    writer: Arc<dyn SerialWriter>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ClientHub {
    /// Binds the listener.  Clients are not accepted until [`serve`] runs.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Bind`] if the address is in use or not
    /// permitted.
    ///
    /// [`serve`]: ClientHub::serve
    pub async fn bind(
        addr: SocketAddr,
        settings: HubSettings,
        writer: Arc<dyn SerialWriter>,
    ) -> Result<Arc<Self>, SetupError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SetupError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SetupError::Bind { addr, source })?;

        info!("WebSocket server listening on {local_addr}");

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            local_addr,
            listener: std::sync::Mutex::new(Some(listener)),
            settings,
            clients: Mutex::new(HashMap::new()),
            writer,
            closed: AtomicBool::new(false),
            shutdown,
        }))
    }

    /// The bound address.  Differs from the requested one when port 0 was
    /// requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs the accept loop until [`close`] is called.
    ///
    /// Accept errors are logged and the loop keeps going.  Only the first
    /// call serves; the listener is consumed.
    ///
    /// [`close`]: ClientHub::close
    pub async fn serve(self: Arc<Self>) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            warn!("WebSocket server on {}: already serving or closed", self.local_addr);
            return;
        };

        let mut shutdown = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        let mut keepalive = interval(self.settings.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await; // The first tick fires immediately.

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("TCP connection from {peer}");
                        sessions.spawn(Arc::clone(&self).run_session(stream, peer));
                    }
                    Err(e) => {
                        // Usually descriptor exhaustion; back off briefly.
                        error!("accept error: {e}");
                        sleep(Duration::from_millis(100)).await;
                    }
                },

                _ = keepalive.tick() => self.ping_all().await,

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("client session panicked: {e}");
                        }
                    }
                }
            }
        }

        drop(listener);

        // Registry entries were dropped by `close`, so sessions are already
        // winding down; abort any still mid-handshake.
        sessions.shutdown().await;

        info!("WebSocket server on {} stopped", self.local_addr);
    }

    /// Sends one serial chunk to every client as a text frame.
    ///
    /// Bytes are decoded as UTF-8 with invalid sequences replaced.  A chunk
    /// that frames to an empty string is still sent.
    pub async fn broadcast(&self, bytes: &[u8]) {
        let text = frame_text(bytes, self.settings.strip_newline);

        let mut clients = self.clients.lock().await;
        let failed = deliver(&mut clients, &WsMessage::Text(text), self.settings.send_timeout).await;
        for id in failed {
            info!("client {id} removed after failed send");
        }
    }

    /// Closes every client and stops the accept loop.  Safe to call
    /// repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);

        // The accept loop may never have run.
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let drained: Vec<(ClientId, ClientConnection)> =
            self.clients.lock().await.drain().collect();

        // `close` on the sink sends a Close frame and flushes it.
        let send_timeout = self.settings.send_timeout;
        join_all(drained.into_iter().map(|(id, mut conn)| async move {
            match timeout(send_timeout, conn.sink.close()).await {
                Ok(Ok(())) => debug!("client {id} ({}): closed", conn.peer),
                Ok(Err(e)) => debug!("client {id} ({}): close failed: {e}", conn.peer),
                Err(_) => debug!("client {id} ({}): close timed out", conn.peer),
            }
        }))
        .await;

        info!("WebSocket server on {} closed", self.local_addr);
    }

    // ── Per-connection handling ───────────────────────────────────────────────

    async fn run_session(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let ws = match timeout(self.settings.handshake_timeout, accept_async(stream)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!("WebSocket handshake with {peer} failed: {e}");
                return;
            }
            Err(_) => {
                warn!("WebSocket handshake with {peer} timed out");
                return;
            }
        };

        let (sink, mut stream) = ws.split();
        let id = Uuid::new_v4();

        let Some(mut evicted) = self.on_connect(id, peer, sink).await else {
            return;
        };

        loop {
            let next = tokio::select! {
                _ = &mut evicted => {
                    debug!("client {id} ({peer}): evicted");
                    break;
                }
                next = timeout(self.settings.idle_timeout, stream.next()) => next,
            };

            let msg = match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(WsError::ConnectionClosed | WsError::Protocol(_)))) => {
                    debug!("client {id} ({peer}): connection closed");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!("client {id} ({peer}): WebSocket error: {e}");
                    break;
                }
                Ok(None) => {
                    debug!("client {id} ({peer}): stream ended");
                    break;
                }
                Err(_) => {
                    info!(
                        "client {id} ({peer}): idle for {:?}, disconnecting",
                        self.settings.idle_timeout
                    );
                    break;
                }
            };

            match msg {
                WsMessage::Text(text) => self.on_client_text(id, &text).await,
                WsMessage::Binary(data) => self.on_client_binary(id, data.len()),
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    trace!("client {id} ({peer}): keepalive frame");
                }
                WsMessage::Close(_) => {
                    debug!("client {id} ({peer}): Close frame received");
                    break;
                }
                WsMessage::Frame(_) => {}
            }
        }

        self.on_disconnect(id).await;
    }

    /// Registers a client.  Returns its eviction receiver, or `None` if the
    /// hub closed during the handshake.
    async fn on_connect(
        &self,
        id: ClientId,
        peer: SocketAddr,
        mut sink: WsSink,
    ) -> Option<oneshot::Receiver<()>> {
        let mut clients = self.clients.lock().await;

        // Checked under the registry lock: `close` sets the flag before it
        // drains, so a client is either drained or refused here.
        if self.is_closed() {
            drop(clients);
            let _ = timeout(self.settings.send_timeout, sink.close()).await;
            return None;
        }

        let (evict_tx, evict_rx) = oneshot::channel();
        clients.insert(
            id,
            ClientConnection {
                peer,
                sink,
                _evict: evict_tx,
            },
        );

        info!("client {id} connected from {peer} ({} connected)", clients.len());
        Some(evict_rx)
    }

    async fn on_disconnect(&self, id: ClientId) {
        let removed = self.clients.lock().await.remove(&id);

        if let Some(mut conn) = removed {
            let _ = timeout(self.settings.send_timeout, conn.sink.close()).await;
            info!("client {id} ({}) disconnected", conn.peer);
        }
    }

    async fn on_client_text(&self, id: ClientId, text: &str) {
        match self.writer.write(text.as_bytes()).await {
            Ok(()) => debug!("client {id} → serial: {} bytes", text.len()),
            Err(e) => warn!("client {id}: write to serial failed: {e}"),
        }
    }

    fn on_client_binary(&self, id: ClientId, len: usize) {
        debug!("client {id}: binary frame ({len} bytes) ignored");
    }

    async fn ping_all(&self) {
        let mut clients = self.clients.lock().await;
        if clients.is_empty() {
            return;
        }

        let failed = deliver(&mut clients, &WsMessage::Ping(Vec::new()), self.settings.send_timeout).await;
        for id in failed {
            info!("client {id} removed after failed ping");
        }
    }
}

#[async_trait]
impl FrameBroadcaster for ClientHub {
    async fn broadcast(&self, bytes: &[u8]) {
        ClientHub::broadcast(self, bytes).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
