use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use crate::position::Coordinate;

/// A customer stop, reported by the visit feature and optionally tied to a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub visit_id: i64,
    pub customer_id: i64,
    pub trip_id: Option<i64>,
    pub position: Coordinate,
    pub title: String,
    pub notes: Option<String>,
    pub photo_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for Visit {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            visit_id: row.try_get("visit_id")?,
            customer_id: row.try_get("customer_id")?,
            trip_id: row.try_get("trip_id")?,
            position: Coordinate::new(row.try_get("latitude")?, row.try_get("longitude")?),
            title: row.try_get("title")?,
            notes: row.try_get("notes")?,
            photo_ref: row.try_get("photo_ref")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

/// Body of `POST /gps/visits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVisit {
    pub customer_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}
