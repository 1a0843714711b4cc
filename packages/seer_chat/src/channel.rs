//! Transport Channel
//!
//! One lazily-created, reconnecting websocket connection shared process-wide
//! across all chat views. A background worker task owns the socket; views
//! hold cheap clones of the handle and subscribe/unsubscribe without ever
//! tearing the connection down. Closing one view never closes the channel.

use futures::{SinkExt, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::ChatError;
use crate::protocol::{ClientEvent, ServerEvent};

const OUTBOUND_QUEUE: usize = 64;
const EVENT_FANOUT: usize = 256;

/// Connection lifecycle as observed by views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// What subscribers receive: connection transitions interleaved with backend
/// events, in the order the worker observed them.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    ConnectError(String),
    Server(ServerEvent),
}

struct ChannelShared {
    outbound_tx: mpsc::Sender<ClientEvent>,
    events_tx: broadcast::Sender<ChannelEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Drop for ChannelShared {
    fn drop(&mut self) {
        // Last handle gone: stop the worker.
        self.cancel.cancel();
    }
}

/// Handle to the shared channel. Clone freely; all clones talk to the same
/// worker task.
#[derive(Clone)]
pub struct ChatChannel {
    inner: Arc<ChannelShared>,
}

static SHARED: OnceLock<ChatChannel> = OnceLock::new();

impl ChatChannel {
    /// Process-wide channel, created on first call and reused afterwards.
    /// Later calls ignore `config` — the connection is never recreated while
    /// one already exists.
    pub fn shared(config: &ClientConfig) -> ChatChannel {
        SHARED.get_or_init(|| ChatChannel::connect(config)).clone()
    }

    /// Spawn a dedicated connection worker. Prefer [`ChatChannel::shared`]
    /// in application code; this exists for tests and multi-backend tools.
    pub fn connect(config: &ClientConfig) -> ChatChannel {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(run_worker(
            config.ws_url.clone(),
            config.reconnect,
            outbound_rx,
            events_tx.clone(),
            state_tx,
            cancel.clone(),
        ));

        ChatChannel {
            inner: Arc::new(ChannelShared {
                outbound_tx,
                events_tx,
                state_rx,
                cancel,
            }),
        }
    }

    /// Subscribe to channel events. Dropping the receiver unsubscribes
    /// without affecting the connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Outbound queue, for components that emit their own events (room
    /// tracker, stream manager, upload coordinator).
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.inner.outbound_tx.clone()
    }

    /// Fire-and-forget send. Events queue while the connection is down and
    /// flush once it recovers; a full queue is a transport failure.
    pub fn send(&self, event: ClientEvent) -> Result<(), ChatError> {
        self.inner
            .outbound_tx
            .try_send(event)
            .map_err(|_| ChatError::Transport("outbound queue is full or closed".to_string()))
    }

    /// Explicit teardown. Not called on view teardown — only when the whole
    /// client shuts down.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

enum Flow {
    Reconnect,
    Shutdown,
}

async fn run_worker(
    ws_url: String,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    events_tx: broadcast::Sender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut attempts_left = policy.max_attempts;
    let mut ever_connected = false;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let _ = state_tx.send(if ever_connected {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((stream, _)) => {
                info!(url = %ws_url, "channel connected");
                ever_connected = true;
                attempts_left = policy.max_attempts;
                let _ = state_tx.send(ConnectionState::Connected);
                let _ = events_tx.send(ChannelEvent::Connected);

                match run_connection(stream, &mut outbound_rx, &events_tx, &cancel).await {
                    Flow::Shutdown => {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    Flow::Reconnect => {
                        warn!("channel connection lost");
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        let _ = events_tx.send(ChannelEvent::Disconnected);
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "channel connect attempt failed");
                let _ = events_tx.send(ChannelEvent::ConnectError(e.to_string()));
            }
        }

        if attempts_left == 0 {
            warn!(
                attempts = policy.max_attempts,
                "reconnect attempts exhausted, channel stays disconnected"
            );
            let _ = state_tx.send(ConnectionState::Disconnected);
            cancel.cancelled().await;
            return;
        }
        attempts_left -= 1;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

/// Pump one live connection until it drops or the channel shuts down.
async fn run_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    events_tx: &broadcast::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> Flow {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(tungstenite::Message::Close(None)).await;
                return Flow::Shutdown;
            }

            maybe = outbound_rx.recv() => {
                let Some(event) = maybe else {
                    // All handles dropped.
                    let _ = sink.send(tungstenite::Message::Close(None)).await;
                    return Flow::Shutdown;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sink.send(tungstenite::Message::Text(json.into())).await.is_err() {
                            return Flow::Reconnect;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outbound event"),
                }
            }

            maybe = source.next() => {
                match maybe {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                let _ = events_tx.send(ChannelEvent::Server(event));
                            }
                            Err(e) => debug!(error = %e, "unrecognized frame, dropping"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => {
                        return Flow::Reconnect;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                }
            }
        }
    }
}
