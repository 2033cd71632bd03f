//! Live position channel.
//!
//! Every sample is pushed to the tracking room as it is taken. The channel is
//! lossy: a sample sent while disconnected is dropped, never retried.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use field_trip_lib::comms::{ClientEvent, PositionUpdate, ServerEvent};
use futures::{SinkExt, StreamExt};
use reqwest::{StatusCode, Url};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::{self, Message}};

use crate::{
    backoff::{Backoff, BackoffConfig},
    error::{Result, TrackerError},
};

const OUTGOING_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Opens the channel for `user_id`. Reconnects on its own until [`disconnect`](RealtimeChannel::disconnect).
    async fn connect(&self, user_id: i64, token: &str) -> Result<()>;
    /// Joins the tracking room, now and after every reconnect.
    async fn join_tracking_room(&self) -> Result<()>;
    /// Pushes a position without waiting. A no-op while disconnected.
    fn send_position(&self, update: PositionUpdate);
    /// Events from the room: peer positions and presence.
    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;
    /// Closes the channel. Nothing is sent after this returns.
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
}

struct Connection {
    outgoing: mpsc::Sender<ClientEvent>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// WebSocket channel to the server's `/tracking` endpoint.
pub struct WsRealtimeChannel {
    url: String,
    backoff: BackoffConfig,
    handshake_timeout: Duration,
    connected: Arc<AtomicBool>,
    joined: Arc<AtomicBool>,
    events: broadcast::Sender<ServerEvent>,
    connection: Mutex<Option<Connection>>,
}

impl WsRealtimeChannel {
    pub fn new(url: impl Into<String>, backoff: BackoffConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            url: url.into(),
            backoff,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            connected: Arc::new(AtomicBool::new(false)),
            joined: Arc::new(AtomicBool::new(false)),
            events,
            connection: Mutex::new(None),
        }
    }

    /// Bounds each connect attempt. An attempt that runs out counts as failed.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RealtimeChannel for WsRealtimeChannel {
    async fn connect(&self, user_id: i64, token: &str) -> Result<()> {
        if self.connection().is_some() {
            return Err(TrackerError::InvalidState("Channel is already open".to_string()));
        }

        let mut url = Url::parse(&self.url).map_err(|e| TrackerError::Config(format!("Invalid tracking url {}: {}", self.url, e)))?;
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("userId", &user_id.to_string());

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (first_tx, first_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            ConnectionTask {
                url,
                backoff: Backoff::new(self.backoff),
                handshake_timeout: self.handshake_timeout,
                connected: self.connected.clone(),
                joined: self.joined.clone(),
                events: self.events.clone(),
            },
            outgoing_rx,
            shutdown_rx,
            first_tx,
        ));

        // The first attempt decides between rejected and accepted. A network
        // failure is retried in the background.
        match first_rx.await {
            Ok(Err(error)) => {
                let _ = task.await;
                Err(error)
            },
            _ => {
                *self.connection() = Some(Connection { outgoing, shutdown, task });
                Ok(())
            },
        }
    }

    async fn join_tracking_room(&self) -> Result<()> {
        let connection = self.connection();
        let Some(connection) = connection.as_ref() else {
            return Err(TrackerError::InvalidState("Channel is not open".to_string()));
        };

        self.joined.store(true, Ordering::SeqCst);
        if self.connected.load(Ordering::SeqCst) {
            // A duplicate join after a concurrent reconnect is ignored by the server.
            let _ = connection.outgoing.try_send(ClientEvent::JoinTracking);
        }
        Ok(())
    }

    fn send_position(&self, update: PositionUpdate) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        if let Some(connection) = self.connection().as_ref() {
            if connection.outgoing.try_send(ClientEvent::PositionUpdate(update)).is_err() {
                tracing::debug!("Outgoing queue full, dropped a position");
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        let connection = self.connection().take();
        if let Some(connection) = connection {
            let _ = connection.shutdown.send(true);
            drop(connection.outgoing);
            if let Err(e) = connection.task.await {
                tracing::error!("Tracking connection task failed: {}", e);
            }
        }
        self.joined.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct ConnectionTask {
    url: Url,
    backoff: Backoff,
    handshake_timeout: Duration,
    connected: Arc<AtomicBool>,
    joined: Arc<AtomicBool>,
    events: broadcast::Sender<ServerEvent>,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

async fn run_connection(
    mut task: ConnectionTask,
    mut outgoing: mpsc::Receiver<ClientEvent>,
    mut shutdown: watch::Receiver<bool>,
    first: oneshot::Sender<Result<()>>,
) {
    let mut first = Some(first);

    loop {
        let attempt = tokio::select! {
            attempt = tokio::time::timeout(task.handshake_timeout, connect_async(task.url.as_str())) => attempt,
            _ = shutdown.changed() => break,
        };
        let attempt = attempt.unwrap_or_else(|_| {
            Err(tungstenite::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "tracking socket handshake timed out",
            )))
        });

        match attempt {
            Ok((socket, _)) => {
                task.backoff.reset();

                // Positions queued while the previous connection was failing are stale.
                while outgoing.try_recv().is_ok() {}

                task.connected.store(true, Ordering::SeqCst);
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                }
                tracing::info!("Tracking channel connected");

                let end = run_session(&task, socket, &mut outgoing, &mut shutdown).await;
                task.connected.store(false, Ordering::SeqCst);

                if let SessionEnd::Shutdown = end {
                    break;
                }
                tracing::warn!("Tracking channel lost, reconnecting");
            },
            Err(tungstenite::Error::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                if let Some(first) = first.take() {
                    let _ = first.send(Err(TrackerError::PermissionDenied("Tracking socket rejected the token".to_string())));
                    break;
                }
                tracing::error!("Tracking socket rejected the token, retrying");
            },
            Err(e) => {
                if let Some(first) = first.take() {
                    let _ = first.send(Ok(()));
                }
                tracing::warn!("Tracking channel connect failed: {}", e);
            },
        }

        let delay = task.backoff.next_delay();
        tracing::debug!("Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown.changed() => break,
        }
    }

    task.connected.store(false, Ordering::SeqCst);
    tracing::debug!("Tracking connection task stopped");
}

async fn run_session(
    task: &ConnectionTask,
    socket: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outgoing: &mut mpsc::Receiver<ClientEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    if task.joined.load(Ordering::SeqCst) && send_event(&mut sink, &ClientEvent::JoinTracking).await.is_err() {
        return SessionEnd::Lost;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = tokio::time::timeout(Duration::from_secs(1), sink.send(Message::Close(None))).await;
                return SessionEnd::Shutdown;
            },
            event = outgoing.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        return SessionEnd::Lost;
                    }
                },
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => {
                        // No subscribers is fine.
                        let _ = task.events.send(event);
                    },
                    Err(e) => tracing::warn!("Ignoring malformed room event: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::warn!("Tracking channel error: {}", e);
                    return SessionEnd::Lost;
                },
            },
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> std::result::Result<(), ()>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(event).map_err(|e| tracing::error!("Failed to encode event: {}", e))?;
    sink.send(Message::Text(text.into())).await.map_err(|e| tracing::warn!("Failed to send event: {}", e))
}
