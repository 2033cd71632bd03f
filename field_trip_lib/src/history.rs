//! Reassembles a completed trip into a single displayable timeline.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::Checkpoint,
    distance::polyline_distance_meters,
    position::Coordinate,
    trip::{Trip, TripFilter, TripStatus},
    visit::Visit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryRange {
    Today,
    Last7Days,
    Last30Days,
}

impl HistoryRange {
    /// Inclusive `[from, to]` window ending at `now`. "Today" starts at UTC midnight.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = match self {
            HistoryRange::Today => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            HistoryRange::Last7Days => now - Duration::days(7),
            HistoryRange::Last30Days => now - Duration::days(30),
        };
        (from, now)
    }

    /// The `GET /trips` filter selecting completed trips started in this range.
    pub fn filter(&self, now: DateTime<Utc>) -> TripFilter {
        let (from, to) = self.bounds(now);
        TripFilter {
            status: Some(TripStatus::Completed),
            start_date: Some(from),
            end_date: Some(to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub checkpoint_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimelineEntry {
    Start { timestamp: DateTime<Utc>, position: Coordinate },
    Checkpoint { timestamp: DateTime<Utc>, sequence: i64, position: Coordinate },
    Visit { timestamp: DateTime<Utc>, visit_id: i64, title: String, position: Coordinate },
    End { timestamp: DateTime<Utc>, position: Coordinate },
}

impl TimelineEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Start { timestamp, .. }
            | TimelineEntry::Checkpoint { timestamp, .. }
            | TimelineEntry::Visit { timestamp, .. }
            | TimelineEntry::End { timestamp, .. } => *timestamp,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TimelineEntry::Start { .. } => 0,
            TimelineEntry::Checkpoint { .. } => 1,
            TimelineEntry::Visit { .. } => 2,
            TimelineEntry::End { .. } => 3,
        }
    }
}

/// A trip with its ordered checkpoint polyline and the visits made during it.
///
/// Missing checkpoints or visits are a valid state and give empty lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripHistory {
    pub trip: Trip,
    pub checkpoints: Vec<Checkpoint>,
    pub visits: Vec<Visit>,
    pub summary: TripSummary,
}

impl TripHistory {
    pub fn reconstruct(trip: Trip, mut checkpoints: Vec<Checkpoint>, visits: Vec<Visit>) -> Self {
        checkpoints.retain(|c| c.trip_id == trip.trip_id);
        checkpoints.sort_by_key(|c| c.sequence);

        let mut visits: Vec<Visit> = visits
            .into_iter()
            .filter(|v| v.trip_id == Some(trip.trip_id))
            .collect();
        visits.sort_by_key(|v| (v.timestamp, v.visit_id));

        let summary = TripSummary {
            distance_km: trip.distance_km.unwrap_or_else(|| derived_distance_km(&trip, &checkpoints)),
            duration_minutes: trip.duration_minutes.unwrap_or_else(|| derived_duration_minutes(&trip, &checkpoints)),
            checkpoint_count: checkpoints.len(),
        };

        Self {
            trip,
            checkpoints,
            visits,
            summary,
        }
    }

    pub fn polyline(&self) -> Vec<Coordinate> {
        self.checkpoints.iter().map(|c| c.position).collect()
    }

    /// Start, checkpoints, visits and end merged in time order.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let mut entries = Vec::with_capacity(self.checkpoints.len() + self.visits.len() + 2);

        entries.push(TimelineEntry::Start {
            timestamp: self.trip.start_time,
            position: self.trip.start,
        });

        entries.extend(self.checkpoints.iter().map(|c| TimelineEntry::Checkpoint {
            timestamp: c.timestamp,
            sequence: c.sequence,
            position: c.position,
        }));

        entries.extend(self.visits.iter().map(|v| TimelineEntry::Visit {
            timestamp: v.timestamp,
            visit_id: v.visit_id,
            title: v.title.clone(),
            position: v.position,
        }));

        if let (Some(timestamp), Some(position)) = (self.trip.end_time, self.trip.end) {
            entries.push(TimelineEntry::End { timestamp, position });
        }

        // Stable sort keeps checkpoint sequence order for equal timestamps.
        entries.sort_by_key(|e| (e.timestamp(), e.rank()));
        entries
    }
}

fn derived_distance_km(trip: &Trip, checkpoints: &[Checkpoint]) -> f64 {
    let mut path = Vec::with_capacity(checkpoints.len() + 2);
    path.push(trip.start);
    path.extend(checkpoints.iter().map(|c| c.position));
    path.extend(trip.end);
    polyline_distance_meters(&path) / 1000.0
}

fn derived_duration_minutes(trip: &Trip, checkpoints: &[Checkpoint]) -> f64 {
    let last = trip
        .end_time
        .or_else(|| checkpoints.last().map(|c| c.timestamp))
        .unwrap_or(trip.start_time);
    (last - trip.start_time).num_milliseconds().max(0) as f64 / 60_000.0
}
