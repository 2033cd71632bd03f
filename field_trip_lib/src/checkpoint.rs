use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use crate::position::{Coordinate, PositionSample};

/// A durably stored sample of a trip. Write-once.
///
/// `sequence` is assigned by the server and is the only ordering that counts;
/// the client's local sample counter is never sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub checkpoint_id: i64,
    pub trip_id: i64,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub position: Coordinate,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for Checkpoint {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            checkpoint_id: row.try_get("checkpoint_id")?,
            trip_id: row.try_get("trip_id")?,
            sequence: row.try_get("sequence")?,
            timestamp: row.try_get("timestamp")?,
            position: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
            accuracy: row.try_get("accuracy")?,
            speed: row.try_get("speed")?,
            heading: row.try_get("heading")?,
        })
    }
}

/// Body of `POST /trips/checkpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCheckpoint {
    pub trip_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl NewCheckpoint {
    pub fn from_sample(trip_id: i64, sample: &PositionSample) -> Self {
        Self {
            trip_id,
            latitude: sample.position.latitude,
            longitude: sample.position.longitude,
            accuracy: Some(sample.accuracy),
            speed: sample.speed,
            heading: sample.heading,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}
