use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use field_trip_lib::{
    checkpoint::{Checkpoint, NewCheckpoint},
    distance::polyline_distance_meters,
    history::{HistoryRange, TripHistory},
    trip::{EndTripRequest, StartTripRequest, Trip, TripFilter},
    user::User,
    visit::{NewVisit, Visit},
};

use crate::{database::db::TripDatabase, DataManagerError, DATABASE_PATH};

#[derive(Clone)]
pub struct DataManager {
    pub(crate) database: TripDatabase,
}

/// The public interface for all trip data management.
///
/// Every read or write on behalf of a user is scoped to that user: a trip owned by
/// someone else is reported as `NotFound`.
impl DataManager {
    /// Opens the database at `path`, or at `data/database.db` under the project root.
    pub async fn start(path: Option<&Path>) -> Result<Self, DataManagerError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_database_path()?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|_| DataManagerError::Database(format!("Failed to create data directory: {:?}", parent)))?;
            }
        }

        tracing::info!("Opening trip database at {:?}", path);
        let database = TripDatabase::connect(&path).await?;

        Ok(DataManager {
            database,
        })
    }

    pub async fn in_memory() -> Result<Self, DataManagerError> {
        Ok(DataManager {
            database: TripDatabase::in_memory().await?,
        })
    }

    pub async fn register_user(&self, user_name: &str, token_hash: &str, join_time: DateTime<Utc>) -> Result<User, DataManagerError> {
        self.database.insert_user(user_name, token_hash, join_time).await
    }

    pub async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, DataManagerError> {
        self.database.get_user_by_token_hash(token_hash).await
    }

    pub async fn start_trip(&self, user_id: i64, request: &StartTripRequest, start_time: DateTime<Utc>) -> Result<Trip, DataManagerError> {
        if let Some(active) = self.database.get_active_trip(user_id).await? {
            return Err(DataManagerError::Conflict(format!("User {} already has active trip {}", user_id, active.trip_id)));
        }

        let trip = self.database.insert_trip(user_id, request, start_time).await?;
        tracing::info!("User {} started trip {} ({})", user_id, trip.trip_id, trip.purpose);
        Ok(trip)
    }

    /// Completes an active trip. Distance is the length of the path
    /// start → checkpoints (by sequence) → end.
    pub async fn end_trip(&self, user_id: i64, trip_id: i64, request: &EndTripRequest, end_time: DateTime<Utc>) -> Result<Trip, DataManagerError> {
        let trip = self.get_trip(user_id, trip_id).await?;
        if !trip.is_active() {
            return Err(DataManagerError::InvalidState(format!("Trip {} is {}", trip_id, trip.status)));
        }

        let checkpoints = self.database.get_trip_checkpoints(trip_id).await?;

        let mut path = Vec::with_capacity(checkpoints.len() + 2);
        path.push(trip.start);
        path.extend(checkpoints.iter().map(|checkpoint| checkpoint.position));
        path.push(request.coordinate());
        let distance_km = polyline_distance_meters(&path) / 1000.0;

        let duration_minutes = (end_time - trip.start_time).num_milliseconds().max(0) as f64 / 60_000.0;

        let Some(trip) = self.database.complete_trip(trip_id, request, end_time, distance_km, duration_minutes).await? else {
            // Lost a race against another end request.
            return Err(DataManagerError::InvalidState(format!("Trip {} is no longer active", trip_id)));
        };

        tracing::info!(
            "User {} ended trip {}: {:.3} km in {:.1} min over {} checkpoints",
            user_id, trip_id, distance_km, duration_minutes, checkpoints.len()
        );
        Ok(trip)
    }

    pub async fn get_active_trip(&self, user_id: i64) -> Result<Option<Trip>, DataManagerError> {
        self.database.get_active_trip(user_id).await
    }

    pub async fn get_trip(&self, user_id: i64, trip_id: i64) -> Result<Trip, DataManagerError> {
        match self.database.get_trip(trip_id).await? {
            Some(trip) if trip.user_id == user_id => Ok(trip),
            _ => Err(DataManagerError::NotFound(format!("Trip {} not found", trip_id))),
        }
    }

    pub async fn get_trips(&self, user_id: i64, filter: &TripFilter) -> Result<Vec<Trip>, DataManagerError> {
        self.database.get_trips(user_id, filter).await
    }

    pub async fn append_checkpoint(&self, user_id: i64, checkpoint: &NewCheckpoint, received_at: DateTime<Utc>) -> Result<Checkpoint, DataManagerError> {
        if let Some(stored) = self.database.insert_checkpoint(user_id, checkpoint, received_at).await? {
            tracing::debug!("Stored checkpoint {} of trip {}", stored.sequence, stored.trip_id);
            return Ok(stored);
        }

        // Nothing was inserted, find out why.
        let trip = self.get_trip(user_id, checkpoint.trip_id).await?;
        Err(DataManagerError::InvalidState(format!("Trip {} is {}", trip.trip_id, trip.status)))
    }

    pub async fn get_trip_checkpoints(&self, user_id: i64, trip_id: i64) -> Result<Vec<Checkpoint>, DataManagerError> {
        self.get_trip(user_id, trip_id).await?;
        self.database.get_trip_checkpoints(trip_id).await
    }

    pub async fn record_visit(&self, user_id: i64, visit: &NewVisit, timestamp: DateTime<Utc>) -> Result<Visit, DataManagerError> {
        if let Some(trip_id) = visit.trip_id {
            self.get_trip(user_id, trip_id).await?;
        }
        self.database.insert_visit(visit, timestamp).await
    }

    pub async fn get_trip_visits(&self, user_id: i64, trip_id: i64) -> Result<Vec<Visit>, DataManagerError> {
        self.get_trip(user_id, trip_id).await?;
        self.database.get_trip_visits(trip_id).await
    }

    /// Completed trips started within `range`, newest first, each with its
    /// checkpoints and visits.
    pub async fn get_trip_history(&self, user_id: i64, range: HistoryRange, now: DateTime<Utc>) -> Result<Vec<TripHistory>, DataManagerError> {
        let trips = self.database.get_trips(user_id, &range.filter(now)).await?;

        let mut history = Vec::with_capacity(trips.len());
        for trip in trips {
            let checkpoints = self.database.get_trip_checkpoints(trip.trip_id).await?;
            let visits = self.database.get_trip_visits(trip.trip_id).await?;
            history.push(TripHistory::reconstruct(trip, checkpoints, visits));
        }

        Ok(history)
    }

    pub async fn export_gpx(&self, user_id: i64, trip_id: i64) -> Result<String, DataManagerError> {
        let trip = self.get_trip(user_id, trip_id).await?;
        let checkpoints = self.database.get_trip_checkpoints(trip_id).await?;
        let visits = self.database.get_trip_visits(trip_id).await?;
        crate::gpx_util::trip_to_gpx(&TripHistory::reconstruct(trip, checkpoints, visits))
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

fn default_database_path() -> Result<PathBuf, DataManagerError> {
    let root = project_root::get_project_root()
        .map_err(|e| DataManagerError::Database(format!("Failed to locate project root: {}", e)))?;
    Ok(root.join(DATABASE_PATH))
}
