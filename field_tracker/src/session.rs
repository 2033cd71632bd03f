use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use field_trip_lib::{
    checkpoint::Checkpoint,
    distance::DistanceAccumulator,
    position::{Coordinate, PositionSample},
};

use crate::throttle::CheckpointThrottler;

/// What the tracking screen shows. Published after every sample and timer tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingSnapshot {
    pub trip_id: Option<i64>,
    pub position: Option<Coordinate>,
    pub distance_m: f64,
    pub samples: u64,
    pub checkpoints: u64,
    pub elapsed: Duration,
    pub sampler_error: Option<String>,
}

/// The result of recording a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutcome {
    pub added_m: f64,
    /// The sample is due for persistence.
    pub persist: bool,
}

#[derive(Debug)]
struct SessionState {
    current: Option<PositionSample>,
    trail: Vec<Coordinate>,
    distance: DistanceAccumulator,
    throttler: CheckpointThrottler,
    checkpoints: u64,
    sampler_error: Option<String>,
}

/// Running state of one tracked trip on this device.
///
/// Sample callbacks hold an `Arc` to the session they were started for. Once
/// [`end`](TrackingSession::end) clears the live flag, late callbacks are ignored.
#[derive(Debug)]
pub struct TrackingSession {
    trip_id: i64,
    started_at: DateTime<Utc>,
    live: AtomicBool,
    state: Mutex<SessionState>,
}

impl TrackingSession {
    pub fn new(trip_id: i64, started_at: DateTime<Utc>, checkpoint_every: NonZeroU32) -> Self {
        Self {
            trip_id,
            started_at,
            live: AtomicBool::new(true),
            state: Mutex::new(SessionState {
                current: None,
                trail: Vec::new(),
                distance: DistanceAccumulator::new(),
                throttler: CheckpointThrottler::new(checkpoint_every),
                checkpoints: 0,
                sampler_error: None,
            }),
        }
    }

    /// A session for a trip resumed after a restart, its trail and distance
    /// rebuilt from the stored checkpoints.
    pub fn seeded(trip_id: i64, started_at: DateTime<Utc>, checkpoint_every: NonZeroU32, checkpoints: &[Checkpoint]) -> Self {
        let session = Self::new(trip_id, started_at, checkpoint_every);
        {
            let mut state = session.lock();
            let mut ordered: Vec<&Checkpoint> = checkpoints.iter().filter(|c| c.trip_id == trip_id).collect();
            ordered.sort_by_key(|c| c.sequence);

            for checkpoint in ordered {
                state.distance.push(checkpoint.position);
                state.trail.push(checkpoint.position);
                state.checkpoints += 1;
            }
        }
        session
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn trip_id(&self) -> i64 {
        self.trip_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stops the session from accepting samples. Returns false if it was already ended.
    pub fn end(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }

    /// Accumulates a delivered sample. `None` once the session has ended.
    pub fn record(&self, sample: &PositionSample) -> Option<SampleOutcome> {
        let mut state = self.lock();
        // Checked under the lock so `end` cannot interleave with a recording.
        if !self.is_live() {
            return None;
        }

        let added_m = state.distance.push(sample.position);
        state.trail.push(sample.position);
        state.current = Some(sample.clone());

        let persist = state.throttler.observe();
        if persist {
            state.checkpoints += 1;
        }

        Some(SampleOutcome { added_m, persist })
    }

    pub fn record_sampler_error(&self, error: impl Into<String>) {
        self.lock().sampler_error = Some(error.into());
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TrackingSnapshot {
        let state = self.lock();
        TrackingSnapshot {
            trip_id: Some(self.trip_id),
            position: state.current.as_ref().map(|s| s.position).or(state.distance.last()),
            distance_m: state.distance.total_meters(),
            samples: state.throttler.samples(),
            checkpoints: state.checkpoints,
            elapsed: self.elapsed(now),
            sampler_error: state.sampler_error.clone(),
        }
    }

    pub fn trail(&self) -> Vec<Coordinate> {
        self.lock().trail.clone()
    }

    pub fn current(&self) -> Option<PositionSample> {
        self.lock().current.clone()
    }

    /// One line for the trip notes, e.g. `1.25 km in 42 min, 18 checkpoints`.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let state = self.lock();
        format!(
            "{:.2} km in {} min, {} checkpoints",
            state.distance.total_km(),
            self.elapsed(now).as_secs() / 60,
            state.checkpoints
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{north_of, sample_at, GUADELOUPE};

    fn every(k: u32) -> NonZeroU32 {
        NonZeroU32::new(k).unwrap()
    }

    #[test]
    fn records_distance_and_throttles() {
        let start = sample_at(GUADELOUPE, 0);
        let session = TrackingSession::new(1, start.timestamp, every(2));

        let second = north_of(GUADELOUPE, 12.0);
        let third = north_of(second, 9.0);
        let fourth = north_of(third, 15.0);

        let outcomes: Vec<SampleOutcome> = [start.clone(), sample_at(second, 5), sample_at(third, 10), sample_at(fourth, 15)]
            .iter()
            .map(|s| session.record(s).unwrap())
            .collect();

        assert_eq!(outcomes.iter().map(|o| o.persist).collect::<Vec<_>>(), vec![false, true, false, true]);
        assert_eq!(outcomes[0].added_m, 0.0);

        let snapshot = session.snapshot(start.timestamp + chrono::Duration::seconds(15));
        assert!((snapshot.distance_m - 36.0).abs() < 0.01);
        assert_eq!(snapshot.samples, 4);
        assert_eq!(snapshot.checkpoints, 2);
        assert_eq!(snapshot.elapsed, Duration::from_secs(15));
        assert_eq!(snapshot.position, Some(fourth));
        assert_eq!(session.trail().len(), 4);
    }

    #[test]
    fn ended_session_ignores_samples() {
        let session = TrackingSession::new(1, sample_at(GUADELOUPE, 0).timestamp, every(1));
        assert!(session.record(&sample_at(GUADELOUPE, 0)).is_some());

        assert!(session.end());
        assert!(!session.end());
        assert!(session.record(&sample_at(north_of(GUADELOUPE, 50.0), 10)).is_none());
        assert_eq!(session.snapshot(Utc::now()).samples, 1);
    }

    #[test]
    fn seeded_session_continues_the_trail() {
        let base = sample_at(GUADELOUPE, 0).timestamp;
        let checkpoint = |sequence: i64, meters: f64| Checkpoint {
            checkpoint_id: sequence,
            trip_id: 9,
            sequence,
            timestamp: base + chrono::Duration::seconds(sequence * 10),
            position: north_of(GUADELOUPE, meters),
            accuracy: Some(5.0),
            speed: None,
            heading: None,
        };
        // Out of order on purpose.
        let stored = vec![checkpoint(2, 40.0), checkpoint(1, 20.0)];

        let session = TrackingSession::seeded(9, base, every(2), &stored);
        let snapshot = session.snapshot(base);
        assert!((snapshot.distance_m - 20.0).abs() < 0.01);
        assert_eq!(snapshot.checkpoints, 2);
        assert_eq!(snapshot.samples, 0);
        assert_eq!(snapshot.position, Some(north_of(GUADELOUPE, 40.0)));

        let outcome = session.record(&sample_at(north_of(GUADELOUPE, 50.0), 30)).unwrap();
        assert!((outcome.added_m - 10.0).abs() < 0.01);
    }

    #[test]
    fn summary_line() {
        let base = sample_at(GUADELOUPE, 0).timestamp;
        let session = TrackingSession::new(1, base, every(1));
        session.record(&sample_at(GUADELOUPE, 0));
        session.record(&sample_at(north_of(GUADELOUPE, 1250.0), 60));

        assert_eq!(session.summary(base + chrono::Duration::minutes(42)), "1.25 km in 42 min, 2 checkpoints");
    }
}
