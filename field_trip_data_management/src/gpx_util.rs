use chrono::{DateTime, Utc};
use field_trip_lib::history::TripHistory;
use gpx::{Gpx, GpxVersion, Metadata, Track, TrackSegment, Waypoint};
use time::OffsetDateTime;

use crate::DataManagerError;

/// Renders a trip as GPX 1.1: one track of its checkpoints, plus a waypoint per visit.
pub fn trip_to_gpx(history: &TripHistory) -> Result<String, DataManagerError> {
    let mut segment = TrackSegment::new();
    for checkpoint in &history.checkpoints {
        let mut point = Waypoint::new(checkpoint.position.to_point());
        point.time = Some(to_gpx_time(checkpoint.timestamp)?);
        point.speed = checkpoint.speed;
        segment.points.push(point);
    }

    let mut track = Track::new();
    track.name = Some(history.trip.purpose.clone());
    track.description = history.trip.notes.clone();
    track.segments.push(segment);

    let mut waypoints = Vec::with_capacity(history.visits.len());
    for visit in &history.visits {
        let mut waypoint = Waypoint::new(visit.position.to_point());
        waypoint.name = Some(visit.title.clone());
        waypoint.comment = visit.notes.clone();
        waypoint.time = Some(to_gpx_time(visit.timestamp)?);
        waypoints.push(waypoint);
    }

    let gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("field_trip".to_string()),
        metadata: Some(Metadata {
            name: Some(format!("Trip {}", history.trip.trip_id)),
            time: Some(to_gpx_time(history.trip.start_time)?),
            ..Default::default()
        }),
        waypoints,
        tracks: vec![track],
        ..Default::default()
    };

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)
        .map_err(|e| DataManagerError::Export(format!("Failed to write GPX: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| DataManagerError::Export(format!("GPX output is not UTF-8: {}", e)))
}

fn to_gpx_time(timestamp: DateTime<Utc>) -> Result<gpx::Time, DataManagerError> {
    OffsetDateTime::from_unix_timestamp_nanos(timestamp.timestamp_millis() as i128 * 1_000_000)
        .map(gpx::Time::from)
        .map_err(|e| DataManagerError::Export(format!("Timestamp out of range: {}", e)))
}
