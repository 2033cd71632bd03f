//! Trip lifecycle on the device.
//!
//! ```text
//! None ──start──▶ Active ──end──▶ Completed ──start──▶ Active
//!                  │  ▲
//!   stop_tracking  ▼  │ resume_recovered
//! recover_on_startup ─▶ Recovered ──terminate_recovered──▶ Completed
//! ```
//!
//! While a trip is Active the manager owns four running resources: the sampler
//! watch, the duration timer, the realtime channel connection and the
//! checkpoint outbox. They are attached together and released together.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use field_trip_lib::{
    checkpoint::NewCheckpoint,
    comms::PositionUpdate,
    position::{Coordinate, PositionSample},
    trip::{EndTripRequest, StartTripRequest, Trip},
};
use tokio::{
    sync::{watch, MutexGuard},
    task::JoinHandle,
};

use crate::{
    api::TripApi,
    config::TrackerConfig,
    error::{Result, TrackerError},
    outbox::CheckpointOutbox,
    realtime::RealtimeChannel,
    sampler::{current_fix, watch_stream, PositionSource, PositionStream, WatchHandle},
    session::{TrackingSession, TrackingSnapshot},
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const FIX_TIMEOUT: Duration = Duration::from_secs(30);
const TIMER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq)]
pub enum TripState {
    #[default]
    None,
    /// An active trip found on the server that this device is not tracking.
    Recovered(Trip),
    Active(Trip),
    Completed(Trip),
}

impl TripState {
    pub fn trip(&self) -> Option<&Trip> {
        match self {
            TripState::None => None,
            TripState::Recovered(trip) | TripState::Active(trip) | TripState::Completed(trip) => Some(trip),
        }
    }
}

struct RunningTrip {
    session: Arc<TrackingSession>,
    watch: WatchHandle,
    timer: JoinHandle<()>,
    outbox: CheckpointOutbox,
}

pub struct TripManager {
    api: Arc<dyn TripApi>,
    channel: Arc<dyn RealtimeChannel>,
    source: Arc<dyn PositionSource>,
    config: TrackerConfig,

    transition: tokio::sync::Mutex<()>,
    state: Mutex<TripState>,
    running: tokio::sync::Mutex<Option<RunningTrip>>,
    snapshot: Arc<watch::Sender<TrackingSnapshot>>,
}

impl TripManager {
    pub fn new(
        api: Arc<dyn TripApi>,
        channel: Arc<dyn RealtimeChannel>,
        source: Arc<dyn PositionSource>,
        config: TrackerConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(TrackingSnapshot::default());
        Self {
            api,
            channel,
            source,
            config,
            transition: tokio::sync::Mutex::new(()),
            state: Mutex::new(TripState::None),
            running: tokio::sync::Mutex::new(None),
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn state(&self) -> TripState {
        self.lock_state().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.snapshot.borrow().clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TripState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TripState) {
        *self.lock_state() = state;
    }

    /// Transitions never overlap. A second one while one is in flight is rejected.
    fn begin_transition(&self) -> Result<MutexGuard<'_, ()>> {
        self.transition
            .try_lock()
            .map_err(|_| TrackerError::InvalidState("Another trip transition is in progress".to_string()))
    }

    /// Starts a trip on the server and begins tracking it.
    ///
    /// The position source is opened first, so a refused permission never
    /// leaves an orphan trip on the server.
    pub async fn start(&self, request: StartTripRequest) -> Result<Trip> {
        let _transition = self.begin_transition()?;

        match self.state() {
            TripState::Active(trip) => {
                return Err(TrackerError::InvalidState(format!("Trip {} is already active", trip.trip_id)))
            },
            TripState::Recovered(trip) => {
                return Err(TrackerError::InvalidState(format!("Trip {} must be resumed or terminated first", trip.trip_id)))
            },
            TripState::None | TripState::Completed(_) => {},
        }

        let stream = self.source.watch().await?;
        let trip = self.api.start_trip(&request).await?;
        tracing::info!("Started trip {} ({})", trip.trip_id, trip.purpose);

        let session = Arc::new(TrackingSession::new(trip.trip_id, trip.start_time, self.config.checkpoint_every));
        self.attach(trip.clone(), session, stream).await;
        Ok(trip)
    }

    /// Looks for a trip left active by a previous run.
    pub async fn recover_on_startup(&self) -> Result<Option<Trip>> {
        let _transition = self.begin_transition()?;

        if let TripState::Active(trip) = self.state() {
            return Err(TrackerError::InvalidState(format!("Trip {} is being tracked", trip.trip_id)));
        }

        match self.api.get_active_trip().await? {
            Some(trip) => {
                tracing::info!("Recovered active trip {}", trip.trip_id);
                self.set_state(TripState::Recovered(trip.clone()));
                Ok(Some(trip))
            },
            None => {
                if let TripState::Recovered(_) = self.state() {
                    self.set_state(TripState::None);
                }
                Ok(None)
            },
        }
    }

    /// Tracks the recovered trip again. Distance and trail continue from its
    /// stored checkpoints, elapsed time from its original start.
    pub async fn resume_recovered(&self) -> Result<Trip> {
        let _transition = self.begin_transition()?;

        let TripState::Recovered(trip) = self.state() else {
            return Err(TrackerError::InvalidState("No recovered trip to resume".to_string()));
        };

        let stream = self.source.watch().await?;

        let checkpoints = match self.api.get_checkpoints(trip.trip_id).await {
            Ok(checkpoints) => checkpoints,
            Err(e) => {
                tracing::warn!("Resuming trip {} without its checkpoints: {}", trip.trip_id, e);
                Vec::new()
            },
        };

        let session = Arc::new(TrackingSession::seeded(
            trip.trip_id,
            trip.start_time,
            self.config.checkpoint_every,
            &checkpoints,
        ));
        tracing::info!("Resuming trip {} from {} checkpoints", trip.trip_id, checkpoints.len());

        self.attach(trip.clone(), session, stream).await;
        Ok(trip)
    }

    /// Ends the recovered trip without tracking it. Without an end coordinate
    /// the current fix is used.
    pub async fn terminate_recovered(&self, end: Option<Coordinate>, notes: Option<String>) -> Result<Trip> {
        let _transition = self.begin_transition()?;

        let TripState::Recovered(trip) = self.state() else {
            return Err(TrackerError::InvalidState("No recovered trip to terminate".to_string()));
        };

        let end = match end {
            Some(end) => end,
            None => current_fix(self.source.as_ref(), FIX_TIMEOUT).await?.position,
        };

        let mut request = EndTripRequest::new(end);
        request.notes = notes;
        let ended = self.api.end_trip(trip.trip_id, &request).await?;

        tracing::info!("Terminated recovered trip {}", ended.trip_id);
        self.set_state(TripState::Completed(ended.clone()));
        Ok(ended)
    }

    /// Ends the active trip. The server is asked first; if it refuses or is
    /// unreachable, tracking carries on untouched.
    pub async fn end(&self, end: Coordinate, address: Option<String>, notes: Option<String>) -> Result<Trip> {
        let _transition = self.begin_transition()?;

        let TripState::Active(trip) = self.state() else {
            return Err(TrackerError::InvalidState("No active trip to end".to_string()));
        };

        let summary = {
            let running = self.running.lock().await;
            match running.as_ref() {
                Some(running) => {
                    if !running.outbox.flush(FLUSH_TIMEOUT).await {
                        tracing::warn!("Ending trip {} with checkpoints still queued", trip.trip_id);
                    }
                    Some(running.session.summary(Utc::now()))
                },
                None => None,
            }
        };

        let mut request = EndTripRequest::new(end);
        request.address = address;
        request.notes = notes.or(summary);

        let ended = self.api.end_trip(trip.trip_id, &request).await?;
        self.detach().await;

        tracing::info!(
            "Ended trip {}: {:.3} km in {:.1} min",
            ended.trip_id,
            ended.distance_km.unwrap_or_default(),
            ended.duration_minutes.unwrap_or_default()
        );
        self.set_state(TripState::Completed(ended.clone()));
        Ok(ended)
    }

    /// Stops tracking without ending the trip on the server. A later
    /// [`resume_recovered`](Self::resume_recovered) picks it up again.
    pub async fn stop_tracking(&self) -> Result<()> {
        let _transition = self.begin_transition()?;

        let TripState::Active(trip) = self.state() else {
            return Ok(());
        };

        self.detach().await;
        tracing::info!("Stopped tracking trip {}", trip.trip_id);
        self.set_state(TripState::Recovered(trip));
        Ok(())
    }

    async fn attach(&self, trip: Trip, session: Arc<TrackingSession>, stream: PositionStream) {
        match self.channel.connect(self.config.user_id, &self.config.token).await {
            Ok(()) => {
                if let Err(e) = self.channel.join_tracking_room().await {
                    tracing::warn!("Failed to join the tracking room: {}", e);
                }
            },
            Err(e) => tracing::warn!("Tracking trip {} without live updates: {}", trip.trip_id, e),
        }

        let outbox = CheckpointOutbox::start(self.api.clone(), self.config.outbox_capacity);

        let on_sample = {
            let session = session.clone();
            let channel = self.channel.clone();
            let outbox = outbox.sender();
            let snapshot = self.snapshot.clone();

            move |sample: PositionSample| {
                // A late sample of an ended session goes nowhere.
                let Some(outcome) = session.record(&sample) else {
                    return;
                };

                channel.send_position(PositionUpdate::from(&sample));
                if outcome.persist {
                    outbox.enqueue(NewCheckpoint::from_sample(session.trip_id(), &sample));
                }
                snapshot.send_replace(session.snapshot(Utc::now()));
            }
        };

        let on_error = {
            let session = session.clone();
            let snapshot = self.snapshot.clone();

            move |error: TrackerError| {
                session.record_sampler_error(error.to_string());
                snapshot.send_replace(session.snapshot(Utc::now()));
            }
        };

        let watch = watch_stream(stream, self.config.sampler, on_sample, on_error);
        let timer = tokio::spawn(run_timer(session.clone(), self.snapshot.clone()));

        self.snapshot.send_replace(session.snapshot(Utc::now()));
        *self.running.lock().await = Some(RunningTrip {
            session,
            watch,
            timer,
            outbox,
        });
        self.set_state(TripState::Active(trip));
    }

    async fn detach(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };

        // Before anything is released, so no callback outlives its trip.
        running.session.end();

        running.watch.stop().await;
        running.timer.abort();
        let _ = (&mut running.timer).await;
        self.channel.disconnect().await;

        let stats = running.outbox.close().await;
        tracing::info!(
            "Released trip {}: {} checkpoints stored, {} failed, {} dropped",
            running.session.trip_id(),
            stats.persisted,
            stats.failed,
            stats.dropped
        );
        if let Some(failure) = running.outbox.last_failure() {
            tracing::warn!("Last checkpoint failure: {}", failure);
        }

        self.snapshot.send_replace(running.session.snapshot(Utc::now()));
    }
}

async fn run_timer(session: Arc<TrackingSession>, snapshot: Arc<watch::Sender<TrackingSnapshot>>) {
    let mut interval = tokio::time::interval(TIMER_PERIOD);
    loop {
        interval.tick().await;
        if !session.is_live() {
            break;
        }
        snapshot.send_replace(session.snapshot(Utc::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fakes::{
            base_time, north_of, sample_at, ChannelPositionSource, MemoryChannel, MemoryTripApi, ScriptedPositionSource,
            GUADELOUPE,
        },
    };
    use crate::{backoff::BackoffConfig, realtime::WsRealtimeChannel};
    use field_trip_lib::trip::TripStatus;

    struct Harness {
        api: Arc<MemoryTripApi>,
        channel: Arc<MemoryChannel>,
        source: Arc<ChannelPositionSource>,
        manager: Arc<TripManager>,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryTripApi::new(1)))
    }

    fn harness_with(api: Arc<MemoryTripApi>) -> Harness {
        let channel = Arc::new(MemoryChannel::new());
        let source = Arc::new(ChannelPositionSource::new());
        let config = TrackerConfig {
            user_id: 1,
            token: "token".to_string(),
            ..TrackerConfig::default()
        };
        let manager = Arc::new(TripManager::new(api.clone(), channel.clone(), source.clone(), config));
        Harness {
            api,
            channel,
            source,
            manager,
        }
    }

    fn request() -> StartTripRequest {
        StartTripRequest::new("prospection", GUADELOUPE)
    }

    async fn wait_for_samples(manager: &TripManager, samples: u64) {
        let mut snapshots = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(|s| s.samples >= samples))
            .await
            .expect("samples were not recorded in time")
            .unwrap();
    }

    #[tokio::test]
    async fn guadeloupe_trip() {
        let h = harness();
        h.api.set_now(base_time());

        let trip = h.manager.start(request()).await.unwrap();
        assert_eq!(trip.status, TripStatus::Active);
        assert!(h.channel.is_connected());
        assert!(h.channel.is_joined());

        let second = north_of(GUADELOUPE, 12.0);
        let third = north_of(second, 9.0);
        let fourth = north_of(third, 15.0);
        for (position, secs) in [(GUADELOUPE, 0), (second, 5), (third, 10), (fourth, 15)] {
            h.source.push(sample_at(position, secs));
        }
        wait_for_samples(&h.manager, 4).await;

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.trip_id, Some(trip.trip_id));
        assert!((snapshot.distance_m - 36.0).abs() < 0.01);
        assert_eq!(snapshot.checkpoints, 2);

        h.api.set_now(base_time() + chrono::Duration::seconds(15));
        let ended = h.manager.end(fourth, None, None).await.unwrap();

        assert_eq!(ended.status, TripStatus::Completed);
        assert!((ended.distance_km.unwrap() - 0.036).abs() < 0.00001);
        assert_eq!(ended.duration_minutes, Some(0.25));
        assert!(ended.notes.as_deref().unwrap().ends_with("2 checkpoints"));

        let stored = h.api.get_checkpoints(trip.trip_id).await.unwrap();
        assert_eq!(stored.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(stored[0].position, second);
        assert_eq!(stored[1].position, fourth);

        let sent: Vec<PositionUpdate> = h.channel.sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3].latitude, fourth.latitude);

        assert_eq!(h.manager.state(), TripState::Completed(ended));
        assert!(!h.channel.is_connected());
    }

    #[tokio::test]
    async fn concurrent_starts_create_one_trip() {
        let h = harness();
        h.api.set_latency(Duration::from_millis(50));

        let (a, b) = tokio::join!(h.manager.start(request()), h.manager.start(request()));
        let results = [a, b];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(TrackerError::InvalidState(_)))));
        assert_eq!(h.api.trips().len(), 1);
    }

    #[tokio::test]
    async fn second_device_is_rejected_by_the_server() {
        let api = Arc::new(MemoryTripApi::new(1));
        let first = harness_with(api.clone());
        let second = harness_with(api.clone());

        first.manager.start(request()).await.unwrap();
        assert!(matches!(second.manager.start(request()).await, Err(TrackerError::InvalidState(_))));
        assert_eq!(second.manager.state(), TripState::None);
        assert_eq!(api.trips().len(), 1);
    }

    #[tokio::test]
    async fn start_after_completed_goes_active() {
        let h = harness();
        h.manager.start(request()).await.unwrap();
        h.manager.end(GUADELOUPE, None, Some("done".to_string())).await.unwrap();

        let next = h.manager.start(request()).await.unwrap();
        assert_eq!(h.manager.state(), TripState::Active(next));
        assert_eq!(h.channel.connects(), 2);
    }

    #[tokio::test]
    async fn recovery_returns_the_active_trip_or_none() {
        let h = harness();
        assert_eq!(h.manager.recover_on_startup().await.unwrap(), None);
        assert_eq!(h.manager.state(), TripState::None);

        let existing = h.api.start_trip(&request()).await.unwrap();
        let recovered = h.manager.recover_on_startup().await.unwrap().unwrap();
        assert_eq!(recovered.trip_id, existing.trip_id);
        assert_eq!(h.manager.state(), TripState::Recovered(existing));

        // A recovered trip blocks a fresh start until it is resolved.
        assert!(matches!(h.manager.start(request()).await, Err(TrackerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn resume_seeds_from_stored_checkpoints() {
        let h = harness();
        let trip = h.api.start_trip(&request()).await.unwrap();
        for meters in [20.0, 40.0] {
            let sample = sample_at(north_of(GUADELOUPE, meters), 0);
            h.api.append_checkpoint(&NewCheckpoint::from_sample(trip.trip_id, &sample)).await.unwrap();
        }

        h.manager.recover_on_startup().await.unwrap();
        let resumed = h.manager.resume_recovered().await.unwrap();
        assert_eq!(resumed.trip_id, trip.trip_id);

        let snapshot = h.manager.snapshot();
        assert!((snapshot.distance_m - 20.0).abs() < 0.01);
        assert_eq!(snapshot.checkpoints, 2);

        h.source.push(sample_at(north_of(GUADELOUPE, 50.0), 0));
        wait_for_samples(&h.manager, 1).await;
        assert!((h.manager.snapshot().distance_m - 30.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn terminate_uses_the_current_fix() {
        let h = harness();
        let trip = h.api.start_trip(&request()).await.unwrap();
        h.manager.recover_on_startup().await.unwrap();

        let manager = h.manager.clone();
        let terminate = tokio::spawn(async move { manager.terminate_recovered(None, None).await });

        let fix = north_of(GUADELOUPE, 100.0);
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.source.watchers() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        h.source.push(sample_at(fix, 0));

        let ended = terminate.await.unwrap().unwrap();
        assert_eq!(ended.trip_id, trip.trip_id);
        assert_eq!(ended.end, Some(fix));
        assert_eq!(h.manager.state(), TripState::Completed(ended));
    }

    #[tokio::test]
    async fn end_without_active_trip_changes_nothing() {
        let h = harness();
        assert!(matches!(h.manager.end(GUADELOUPE, None, None).await, Err(TrackerError::InvalidState(_))));
        assert_eq!(h.manager.state(), TripState::None);

        h.manager.start(request()).await.unwrap();
        let ended = h.manager.end(GUADELOUPE, None, None).await.unwrap();
        assert!(matches!(h.manager.end(GUADELOUPE, None, None).await, Err(TrackerError::InvalidState(_))));
        assert_eq!(h.manager.state(), TripState::Completed(ended.clone()));
        assert_eq!(h.api.trips(), vec![ended]);
    }

    #[tokio::test]
    async fn network_failure_leaves_state_unchanged() {
        let h = harness();
        h.api.set_offline(true);
        assert!(matches!(h.manager.start(request()).await, Err(TrackerError::NetworkTransient(_))));
        assert_eq!(h.manager.state(), TripState::None);
        assert!(!h.channel.is_connected());

        h.api.set_offline(false);
        let trip = h.manager.start(request()).await.unwrap();

        h.api.set_offline(true);
        assert!(matches!(h.manager.end(GUADELOUPE, None, None).await, Err(TrackerError::NetworkTransient(_))));
        assert_eq!(h.manager.state(), TripState::Active(trip.clone()));
        assert!(h.channel.is_connected());

        // Still tracking.
        h.source.push(sample_at(GUADELOUPE, 0));
        wait_for_samples(&h.manager, 1).await;

        h.api.set_offline(false);
        assert_eq!(h.manager.end(GUADELOUPE, None, None).await.unwrap().trip_id, trip.trip_id);
    }

    #[tokio::test]
    async fn permission_denied_blocks_start() {
        let h = harness();
        h.source.set_denied(true);

        assert!(matches!(h.manager.start(request()).await, Err(TrackerError::PermissionDenied(_))));
        assert_eq!(h.manager.state(), TripState::None);
        assert!(h.api.trips().is_empty());
        assert_eq!(h.channel.connects(), 0);
    }

    #[tokio::test]
    async fn nothing_is_sent_after_stop() {
        let h = harness();
        let trip = h.manager.start(request()).await.unwrap();

        h.source.push(sample_at(GUADELOUPE, 0));
        h.source.push(sample_at(north_of(GUADELOUPE, 20.0), 10));
        wait_for_samples(&h.manager, 2).await;

        h.manager.stop_tracking().await.unwrap();
        assert_eq!(h.manager.state(), TripState::Recovered(trip.clone()));
        assert_eq!(h.source.watchers(), 0);

        h.source.push(sample_at(north_of(GUADELOUPE, 40.0), 20));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.channel.sent().len(), 2);
        assert_eq!(h.api.get_checkpoints(trip.trip_id).await.unwrap().len(), 1);
        // The trip is still open on the server.
        assert!(h.api.get_active_trip().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duration_timer_stops_with_tracking() {
        let h = harness();
        h.manager.start(request()).await.unwrap();

        let mut snapshots = h.manager.subscribe();
        snapshots.borrow_and_update();
        tokio::time::timeout(TIMER_PERIOD * 3, snapshots.changed())
            .await
            .expect("timer did not tick while tracking")
            .unwrap();

        h.manager.stop_tracking().await.unwrap();
        snapshots.borrow_and_update();
        tokio::time::sleep(TIMER_PERIOD * 2 + Duration::from_millis(200)).await;
        assert!(!snapshots.has_changed().unwrap());
        assert!(!h.channel.is_connected());
    }

    #[tokio::test]
    async fn start_returns_when_the_tracking_socket_never_answers() {
        // Accepts connections and holds them without a handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let held = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let api = Arc::new(MemoryTripApi::new(1));
        let channel = Arc::new(
            WsRealtimeChannel::new(format!("ws://{}/tracking", addr), BackoffConfig::default())
                .with_handshake_timeout(Duration::from_millis(200)),
        );
        let source = Arc::new(ChannelPositionSource::new());
        let manager = TripManager::new(api.clone(), channel.clone(), source.clone(), TrackerConfig::default());

        let trip = tokio::time::timeout(Duration::from_secs(5), manager.start(request()))
            .await
            .expect("start hung on the socket handshake")
            .unwrap();
        assert_eq!(manager.state(), TripState::Active(trip.clone()));
        assert!(!channel.is_connected());

        // Samples are still recorded and persisted without the live channel.
        source.push(sample_at(GUADELOUPE, 0));
        source.push(sample_at(north_of(GUADELOUPE, 20.0), 10));
        wait_for_samples(&manager, 2).await;

        let ended = tokio::time::timeout(Duration::from_secs(5), manager.end(GUADELOUPE, None, None))
            .await
            .expect("end hung on the socket handshake")
            .unwrap();
        assert_eq!(ended.trip_id, trip.trip_id);
        assert_eq!(api.get_checkpoints(trip.trip_id).await.unwrap().len(), 1);
        held.abort();
    }

    #[tokio::test]
    async fn sampler_errors_are_surfaced_in_the_snapshot() {
        let source = Arc::new(ScriptedPositionSource::from_results(vec![
            Ok(sample_at(GUADELOUPE, 0)),
            Err(TrackerError::NetworkTransient("receiver lost".to_string())),
        ]));
        let manager = TripManager::new(
            Arc::new(MemoryTripApi::new(1)),
            Arc::new(MemoryChannel::new()),
            source,
            TrackerConfig::default(),
        );
        manager.start(request()).await.unwrap();

        let mut snapshots = manager.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), snapshots.wait_for(|s| s.sampler_error.is_some()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(snapshot.samples, 1);
        assert!(snapshot.sampler_error.unwrap().contains("receiver lost"));

        // The trip is still active and can be ended normally.
        assert!(manager.end(GUADELOUPE, None, None).await.is_ok());
    }
}
