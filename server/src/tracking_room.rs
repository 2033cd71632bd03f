use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use bimap::BiMap;
use field_trip_lib::comms::{ActiveUsers, ClientEvent, PeerPosition, ServerEvent, TrackingHandshake, UserPresence};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::{api::ApiError, auth::authenticate, server_state::ServerState};

/// An event published by one connection to every other joined connection.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub sender: u64,
    pub payload: Arc<str>,
}

/// The shared live-tracking room.
///
/// Members are keyed by connection and by user. A user joining from a second
/// connection takes over the membership of the first.
pub struct TrackingRoom {
    tx: broadcast::Sender<RoomEvent>,
    members: Mutex<BiMap<u64, i64>>,
    next_connection_id: AtomicU64,
}

impl TrackingRoom {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            members: Mutex::new(BiMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn members(&self) -> std::sync::MutexGuard<'_, BiMap<u64, i64>> {
        // The map stays consistent even if a holder panicked.
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds the connection and returns the users present before it.
    fn join(&self, connection_id: u64, user_id: i64) -> Vec<i64> {
        let mut members = self.members();
        let mut others: Vec<i64> = members.right_values().copied().filter(|id| *id != user_id).collect();
        others.sort_unstable();

        if let Some(previous) = members.get_by_right(&user_id) {
            tracing::warn!("User {} joined again, replacing connection {}", user_id, previous);
        }
        members.insert(connection_id, user_id);
        others
    }

    /// Removes the connection. Returns the user if it was still a member.
    fn leave(&self, connection_id: u64) -> Option<i64> {
        self.members().remove_by_left(&connection_id).map(|(_, user_id)| user_id)
    }

    fn is_member(&self, connection_id: u64) -> bool {
        self.members().contains_left(&connection_id)
    }

    pub fn active_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self.members().right_values().copied().collect();
        users.sort_unstable();
        users
    }

    fn publish(&self, sender: u64, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode room event: {}", e);
                return;
            }
        };

        // No receivers is fine, nobody is listening.
        let _ = self.tx.send(RoomEvent {
            sender,
            payload: payload.into(),
        });
    }
}

/// `GET /tracking?token=&userId=`. The token must belong to `userId`.
pub async fn tracking_socket(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<TrackingHandshake>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let Query(handshake) = query.map_err(|_| ApiError::Unauthorized("Missing token or userId".to_string()))?;

    let user = authenticate(&state, &handshake.token).await?;
    if user.user_id != handshake.user_id {
        return Err(ApiError::Unauthorized("Token does not belong to userId".to_string()));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    tracing::info!("User {} ({}) opened a tracking socket", user.user_id, user.user_name);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user.user_id, state)))
}

async fn handle_socket(socket: WebSocket, user_id: i64, state: Arc<ServerState>) {
    let connection_id = state.tracking_room.next_connection_id();
    let (mut sink, mut stream) = socket.split();

    // Replies to this connection only, e.g. the member list on join.
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<String>();
    let mut room_rx = state.tracking_room.tx.subscribe();

    let send_state = state.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(text) => text,
                    None => break,
                },
                event = room_rx.recv() => match event {
                    Ok(event) => {
                        if event.sender == connection_id || !send_state.tracking_room.is_member(connection_id) {
                            continue;
                        }
                        event.payload.to_string()
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Connection {} lagged, skipped {} events", connection_id, skipped);
                        continue;
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        let room = &recv_state.tracking_room;
        while let Some(Ok(message)) = stream.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::JoinTracking) => {
                    if room.is_member(connection_id) {
                        continue;
                    }
                    let users = room.join(connection_id, user_id);
                    let reply = ServerEvent::ActiveUsers(ActiveUsers { users });
                    match serde_json::to_string(&reply) {
                        Ok(reply) => {
                            if direct_tx.send(reply).is_err() {
                                break;
                            }
                        },
                        Err(e) => tracing::error!("Failed to encode active users: {}", e),
                    }
                    room.publish(connection_id, &ServerEvent::UserConnected(UserPresence { user_id }));
                    tracing::debug!("User {} joined the tracking room", user_id);
                },
                Ok(ClientEvent::PositionUpdate(position)) => {
                    if room.is_member(connection_id) {
                        room.publish(connection_id, &ServerEvent::PositionUpdate(PeerPosition { user_id, position }));
                    }
                },
                Err(e) => tracing::warn!("Ignoring malformed frame from user {}: {}", user_id, e),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some(user_id) = state.tracking_room.leave(connection_id) {
        state.tracking_room.publish(connection_id, &ServerEvent::UserDisconnected(UserPresence { user_id }));
    }

    tracing::info!("Tracking socket of user {} closed", user_id);
}
