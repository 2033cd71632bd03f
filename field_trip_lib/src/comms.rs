//! Wire messages shared by the server and the tracker.
//!
//! REST bodies are JSON in camelCase. Realtime frames are JSON objects of the
//! form `{"event": "...", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{checkpoint::Checkpoint, position::PositionSample, trip::Trip, visit::Visit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripResponse {
    pub success: bool,
    pub trip: Option<Trip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripsResponse {
    pub success: bool,
    pub trips: Vec<Trip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub success: bool,
    pub checkpoint: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointsResponse {
    pub success: bool,
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitResponse {
    pub success: bool,
    pub visit: Visit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitsResponse {
    pub success: bool,
    pub visits: Vec<Visit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Conflict,
    InvalidState,
    BadRequest,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error,
            message: message.into(),
        }
    }
}

/// Query of `GET /gps/visits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitQuery {
    pub trip_id: i64,
}

/// Handshake query of the tracking socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingHandshake {
    pub token: String,
    pub user_id: i64,
}

/// A live position as it travels over the tracking socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl From<&PositionSample> for PositionUpdate {
    fn from(sample: &PositionSample) -> Self {
        Self {
            latitude: sample.position.latitude,
            longitude: sample.position.longitude,
            accuracy: sample.accuracy,
            speed: sample.speed,
            heading: sample.heading,
            timestamp: sample.timestamp,
        }
    }
}

/// A position update fanned out by the server, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPosition {
    pub user_id: i64,
    #[serde(flatten)]
    pub position: PositionUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinTracking,
    PositionUpdate(PositionUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsers {
    pub users: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    PositionUpdate(PeerPosition),
    ActiveUsers(ActiveUsers),
    UserConnected(UserPresence),
    UserDisconnected(UserPresence),
}
