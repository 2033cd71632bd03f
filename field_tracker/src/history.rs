use std::sync::Arc;

use chrono::{DateTime, Utc};
use field_trip_lib::{
    history::{HistoryRange, TripHistory},
    trip::Trip,
};

use crate::{api::TripApi, error::Result};

/// Reads completed trips back from the server with their checkpoints and visits.
pub struct HistoryReconstructor {
    api: Arc<dyn TripApi>,
}

impl HistoryReconstructor {
    pub fn new(api: Arc<dyn TripApi>) -> Self {
        Self { api }
    }

    /// Completed trips started within `range`, newest first.
    pub async fn load(&self, range: HistoryRange, now: DateTime<Utc>) -> Result<Vec<TripHistory>> {
        let mut trips = self.api.get_trips(&range.filter(now)).await?;
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let mut histories = Vec::with_capacity(trips.len());
        for trip in trips {
            histories.push(self.reconstruct(trip).await?);
        }

        tracing::debug!("Loaded {} trips for {:?}", histories.len(), range);
        Ok(histories)
    }

    pub async fn reconstruct(&self, trip: Trip) -> Result<TripHistory> {
        let checkpoints = self.api.get_checkpoints(trip.trip_id).await?;

        // Visits belong to another feature. Their absence does not hide the trip.
        let visits = match self.api.get_visits(trip.trip_id).await {
            Ok(visits) => visits,
            Err(e) => {
                tracing::warn!("Showing trip {} without visits: {}", trip.trip_id, e);
                Vec::new()
            },
        };

        Ok(TripHistory::reconstruct(trip, checkpoints, visits))
    }
}
