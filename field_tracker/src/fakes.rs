//! In-memory stand-ins for the position source, the trip server and the
//! realtime channel.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use field_trip_lib::{
    checkpoint::{Checkpoint, NewCheckpoint},
    comms::{PositionUpdate, ServerEvent},
    distance::{polyline_distance_meters, EARTH_RADIUS_M},
    position::{Coordinate, PositionSample},
    trip::{EndTripRequest, StartTripRequest, Trip, TripFilter, TripStatus},
    visit::{NewVisit, Visit},
};
use tokio::sync::broadcast;

use crate::{
    api::TripApi,
    error::{Result, TrackerError},
    realtime::RealtimeChannel,
    sampler::{PositionSource, PositionStream},
};

pub const GUADELOUPE: Coordinate = Coordinate {
    latitude: 16.2650,
    longitude: -61.5510,
};

/// Offsets `origin` northwards by `meters`.
pub fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    let delta = (meters / EARTH_RADIUS_M).to_degrees();
    Coordinate::new(origin.latitude + delta, origin.longitude)
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

/// A 5 m accuracy sample taken `secs` after [`base_time`].
pub fn sample_at(position: Coordinate, secs: i64) -> PositionSample {
    PositionSample::new(position, 5.0, base_time() + chrono::Duration::seconds(secs))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replays a fixed script, then ends.
pub struct ScriptedPositionSource {
    script: Option<Vec<Result<PositionSample>>>,
}

impl ScriptedPositionSource {
    pub fn new(samples: Vec<PositionSample>) -> Self {
        Self::from_results(samples.into_iter().map(Ok).collect())
    }

    pub fn from_results(script: Vec<Result<PositionSample>>) -> Self {
        Self { script: Some(script) }
    }

    pub fn denied() -> Self {
        Self { script: None }
    }
}

#[async_trait]
impl PositionSource for ScriptedPositionSource {
    async fn watch(&self) -> Result<PositionStream> {
        match &self.script {
            Some(script) => Ok(Box::pin(futures::stream::iter(script.clone()))),
            None => Err(TrackerError::PermissionDenied("Location permission refused".to_string())),
        }
    }
}

/// Delivers samples pushed by the test to every open watch.
pub struct ChannelPositionSource {
    tx: broadcast::Sender<PositionSample>,
    denied: AtomicBool,
}

impl ChannelPositionSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            denied: AtomicBool::new(false),
        }
    }

    /// Returns how many watches received the sample.
    pub fn push(&self, sample: PositionSample) -> usize {
        self.tx.send(sample).unwrap_or(0)
    }

    pub fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    pub fn watchers(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PositionSource for ChannelPositionSource {
    async fn watch(&self) -> Result<PositionStream> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(TrackerError::PermissionDenied("Location permission refused".to_string()));
        }

        let rx = self.tx.subscribe();
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(sample) => return Some((Ok(sample), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })))
    }
}

#[derive(Default)]
struct MemoryServer {
    trips: Vec<Trip>,
    checkpoints: Vec<Checkpoint>,
    visits: Vec<Visit>,
    now: Option<DateTime<Utc>>,
    offline: bool,
    fail_checkpoints: bool,
    latency: Duration,
}

impl MemoryServer {
    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(TrackerError::NetworkTransient("Server unreachable".to_string()));
        }
        Ok(())
    }
}

/// The trip server of one user, in memory. Enforces the same rules as the real one.
pub struct MemoryTripApi {
    user_id: i64,
    server: Mutex<MemoryServer>,
}

impl MemoryTripApi {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            server: Mutex::new(MemoryServer::default()),
        }
    }

    /// Pins the server clock.
    pub fn set_now(&self, now: DateTime<Utc>) {
        lock(&self.server).now = Some(now);
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.server).offline = offline;
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        lock(&self.server).fail_checkpoints = fail;
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.server).latency = latency;
    }

    pub fn trips(&self) -> Vec<Trip> {
        lock(&self.server).trips.clone()
    }

    pub fn add_visit(&self, visit: NewVisit) -> Visit {
        let mut server = lock(&self.server);
        let visit = Visit {
            visit_id: server.visits.len() as i64 + 1,
            customer_id: visit.customer_id,
            trip_id: visit.trip_id,
            position: Coordinate::new(visit.latitude, visit.longitude),
            title: visit.title,
            notes: visit.notes,
            photo_ref: visit.photo_ref,
            timestamp: server.now(),
        };
        server.visits.push(visit.clone());
        visit
    }

    async fn delay(&self) {
        let latency = lock(&self.server).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TripApi for MemoryTripApi {
    async fn start_trip(&self, request: &StartTripRequest) -> Result<Trip> {
        self.delay().await;
        let mut server = lock(&self.server);
        server.check_online()?;

        if server.trips.iter().any(|t| t.user_id == self.user_id && t.is_active()) {
            return Err(TrackerError::InvalidState("An active trip already exists".to_string()));
        }

        let trip = Trip {
            trip_id: server.trips.len() as i64 + 1,
            user_id: self.user_id,
            status: TripStatus::Active,
            purpose: request.purpose.clone(),
            objective: request.objective.clone(),
            vehicle_type: request.vehicle_type.clone(),
            estimated_km: request.estimated_km,
            start_time: server.now(),
            start: request.coordinate(),
            start_address: request.address.clone(),
            end_time: None,
            end: None,
            end_address: None,
            notes: None,
            distance_km: None,
            duration_minutes: None,
        };
        server.trips.push(trip.clone());
        Ok(trip)
    }

    async fn end_trip(&self, trip_id: i64, request: &EndTripRequest) -> Result<Trip> {
        self.delay().await;
        let mut server = lock(&self.server);
        server.check_online()?;
        let now = server.now();

        let mut polyline = VecDeque::new();
        let mut points: Vec<&Checkpoint> = server.checkpoints.iter().filter(|c| c.trip_id == trip_id).collect();
        points.sort_by_key(|c| c.sequence);
        polyline.extend(points.iter().map(|c| c.position));

        let Some(trip) = server.trips.iter_mut().find(|t| t.trip_id == trip_id && t.user_id == self.user_id) else {
            return Err(TrackerError::NotFound(format!("Trip {} not found", trip_id)));
        };
        if !trip.is_active() {
            return Err(TrackerError::InvalidState(format!("Trip {} is not active", trip_id)));
        }

        let end = Coordinate::new(request.latitude, request.longitude);
        polyline.push_front(trip.start);
        polyline.push_back(end);

        trip.status = TripStatus::Completed;
        trip.end_time = Some(now);
        trip.end = Some(end);
        trip.end_address = request.address.clone();
        trip.notes = request.notes.clone();
        trip.distance_km = Some(polyline_distance_meters(&polyline) / 1000.0);
        trip.duration_minutes = Some((now - trip.start_time).num_milliseconds() as f64 / 60_000.0);
        Ok(trip.clone())
    }

    async fn get_active_trip(&self) -> Result<Option<Trip>> {
        self.delay().await;
        let server = lock(&self.server);
        server.check_online()?;
        Ok(server.trips.iter().find(|t| t.user_id == self.user_id && t.is_active()).cloned())
    }

    async fn get_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>> {
        self.delay().await;
        let server = lock(&self.server);
        server.check_online()?;

        let mut trips: Vec<Trip> = server
            .trips
            .iter()
            .filter(|t| t.user_id == self.user_id)
            .filter(|t| filter.status.map_or(true, |status| t.status == status))
            .filter(|t| filter.start_date.map_or(true, |from| t.start_time >= from))
            .filter(|t| filter.end_date.map_or(true, |to| t.start_time <= to))
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(trips)
    }

    async fn get_checkpoints(&self, trip_id: i64) -> Result<Vec<Checkpoint>> {
        self.delay().await;
        let server = lock(&self.server);
        server.check_online()?;

        if !server.trips.iter().any(|t| t.trip_id == trip_id && t.user_id == self.user_id) {
            return Err(TrackerError::NotFound(format!("Trip {} not found", trip_id)));
        }
        let mut checkpoints: Vec<Checkpoint> = server.checkpoints.iter().filter(|c| c.trip_id == trip_id).cloned().collect();
        checkpoints.sort_by_key(|c| c.sequence);
        Ok(checkpoints)
    }

    async fn append_checkpoint(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint> {
        self.delay().await;
        let mut server = lock(&self.server);
        server.check_online()?;
        if server.fail_checkpoints {
            return Err(TrackerError::NetworkTransient("Checkpoint write failed".to_string()));
        }

        match server.trips.iter().find(|t| t.trip_id == checkpoint.trip_id && t.user_id == self.user_id) {
            None => return Err(TrackerError::NotFound(format!("Trip {} not found", checkpoint.trip_id))),
            Some(trip) if !trip.is_active() => {
                return Err(TrackerError::InvalidState(format!("Trip {} is not active", checkpoint.trip_id)))
            },
            Some(_) => {},
        }

        let sequence = server.checkpoints.iter().filter(|c| c.trip_id == checkpoint.trip_id).count() as i64 + 1;
        let stored = Checkpoint {
            checkpoint_id: server.checkpoints.len() as i64 + 1,
            trip_id: checkpoint.trip_id,
            sequence,
            timestamp: server.now(),
            position: checkpoint.coordinate(),
            accuracy: checkpoint.accuracy,
            speed: checkpoint.speed,
            heading: checkpoint.heading,
        };
        server.checkpoints.push(stored.clone());
        Ok(stored)
    }

    async fn get_visits(&self, trip_id: i64) -> Result<Vec<Visit>> {
        self.delay().await;
        let server = lock(&self.server);
        server.check_online()?;
        Ok(server.visits.iter().filter(|v| v.trip_id == Some(trip_id)).cloned().collect())
    }
}

/// Records what would have gone over the tracking socket.
pub struct MemoryChannel {
    connected: AtomicBool,
    joined: AtomicBool,
    connects: AtomicUsize,
    refuse: AtomicBool,
    sent: Mutex<Vec<PositionUpdate>>,
    events: broadcast::Sender<ServerEvent>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn sent(&self) -> Vec<PositionUpdate> {
        lock(&self.sent).clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    /// Makes the next connects fail as if the token were rejected.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn inject(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl RealtimeChannel for MemoryChannel {
    async fn connect(&self, _user_id: i64, _token: &str) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TrackerError::PermissionDenied("Tracking socket rejected the token".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::InvalidState("Channel is already open".to_string()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn join_tracking_room(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TrackerError::InvalidState("Channel is not open".to_string()));
        }
        self.joined.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_position(&self, update: PositionUpdate) {
        if self.connected.load(Ordering::SeqCst) {
            lock(&self.sent).push(update);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.joined.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
