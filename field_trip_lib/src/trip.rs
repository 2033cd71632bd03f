use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use crate::position::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Active,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "ACTIVE",
            TripStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(TripStatus::Active),
            "COMPLETED" => Ok(TripStatus::Completed),
            other => Err(format!("Unknown trip status: {other}")),
        }
    }
}

/// One tracked outing, from start to end.
///
/// The end fields, distance and duration stay `None` until the trip is completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub trip_id: i64,
    pub user_id: i64,
    pub status: TripStatus,
    pub purpose: String,
    pub objective: Option<String>,
    pub vehicle_type: Option<String>,
    pub estimated_km: Option<f64>,

    pub start_time: DateTime<Utc>,
    pub start: Coordinate,
    pub start_address: Option<String>,

    pub end_time: Option<DateTime<Utc>>,
    pub end: Option<Coordinate>,
    pub end_address: Option<String>,
    pub notes: Option<String>,

    pub distance_km: Option<f64>,
    pub duration_minutes: Option<f64>,
}

impl Trip {
    pub fn is_active(&self) -> bool {
        self.status == TripStatus::Active
    }
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for Trip {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let status = status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: e.into(),
        })?;

        let end_latitude: Option<f64> = row.try_get("end_latitude")?;
        let end_longitude: Option<f64> = row.try_get("end_longitude")?;
        let end = match (end_latitude, end_longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
            _ => None,
        };

        Ok(Self {
            trip_id: row.try_get("trip_id")?,
            user_id: row.try_get("user_id")?,
            status,
            purpose: row.try_get("purpose")?,
            objective: row.try_get("objective")?,
            vehicle_type: row.try_get("vehicle_type")?,
            estimated_km: row.try_get("estimated_km")?,
            start_time: row.try_get("start_time")?,
            start: Coordinate::new(row.try_get("start_latitude")?, row.try_get("start_longitude")?),
            start_address: row.try_get("start_address")?,
            end_time: row.try_get("end_time")?,
            end,
            end_address: row.try_get("end_address")?,
            notes: row.try_get("notes")?,
            distance_km: row.try_get("distance_km")?,
            duration_minutes: row.try_get("duration_minutes")?,
        })
    }
}

/// Body of `POST /trips/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTripRequest {
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_km: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl StartTripRequest {
    pub fn new(purpose: impl Into<String>, start: Coordinate) -> Self {
        Self {
            purpose: purpose.into(),
            objective: None,
            vehicle_type: None,
            estimated_km: None,
            latitude: start.latitude,
            longitude: start.longitude,
            address: None,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Body of `POST /trips/{id}/end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTripRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EndTripRequest {
    pub fn new(end: Coordinate) -> Self {
        Self {
            latitude: end.latitude,
            longitude: end.longitude,
            address: None,
            notes: None,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Query of `GET /trips`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TripStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}
