use async_trait::async_trait;
use field_trip_lib::{
    checkpoint::{Checkpoint, NewCheckpoint},
    comms::{
        CheckpointResponse, CheckpointsResponse, ErrorCode, ErrorResponse, TripResponse, TripsResponse, VisitQuery,
        VisitsResponse,
    },
    trip::{EndTripRequest, StartTripRequest, Trip, TripFilter},
    visit::Visit,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::{Result, TrackerError};

/// The trip REST interface, scoped to the signed in user.
#[async_trait]
pub trait TripApi: Send + Sync {
    async fn start_trip(&self, request: &StartTripRequest) -> Result<Trip>;
    async fn end_trip(&self, trip_id: i64, request: &EndTripRequest) -> Result<Trip>;
    /// The caller's active trip. No active trip is `Ok(None)`.
    async fn get_active_trip(&self) -> Result<Option<Trip>>;
    async fn get_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>>;
    async fn get_checkpoints(&self, trip_id: i64) -> Result<Vec<Checkpoint>>;
    async fn append_checkpoint(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint>;
    async fn get_visits(&self, trip_id: i64) -> Result<Vec<Visit>>;
}

pub struct HttpTripApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpTripApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| TrackerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{}", self.base_url, path)).bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let text = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(error) => error_from_response(error),
            Err(_) if status.is_server_error() => TrackerError::NetworkTransient(format!("Server replied {}", status)),
            Err(_) => TrackerError::InvalidState(format!("Server replied {}: {}", status, text)),
        })
    }
}

fn error_from_response(error: ErrorResponse) -> TrackerError {
    match error.error {
        ErrorCode::Unauthorized => TrackerError::PermissionDenied(error.message),
        ErrorCode::NotFound => TrackerError::NotFound(error.message),
        ErrorCode::Conflict | ErrorCode::InvalidState | ErrorCode::BadRequest => TrackerError::InvalidState(error.message),
        ErrorCode::Internal => TrackerError::NetworkTransient(error.message),
    }
}

#[async_trait]
impl TripApi for HttpTripApi {
    async fn start_trip(&self, request: &StartTripRequest) -> Result<Trip> {
        let response: TripResponse = self.send(self.post("/trips/start").json(request)).await?;
        response.trip.ok_or_else(|| TrackerError::NetworkTransient("Start reply carried no trip".to_string()))
    }

    async fn end_trip(&self, trip_id: i64, request: &EndTripRequest) -> Result<Trip> {
        let response: TripResponse = self.send(self.post(&format!("/trips/{}/end", trip_id)).json(request)).await?;
        response.trip.ok_or_else(|| TrackerError::NetworkTransient("End reply carried no trip".to_string()))
    }

    async fn get_active_trip(&self) -> Result<Option<Trip>> {
        let response: TripResponse = self.send(self.get("/trips/active")).await?;
        Ok(response.trip)
    }

    async fn get_trips(&self, filter: &TripFilter) -> Result<Vec<Trip>> {
        let response: TripsResponse = self.send(self.get("/trips").query(filter)).await?;
        Ok(response.trips)
    }

    async fn get_checkpoints(&self, trip_id: i64) -> Result<Vec<Checkpoint>> {
        let response: CheckpointsResponse = self.send(self.get(&format!("/trips/{}/checkpoints", trip_id))).await?;
        Ok(response.checkpoints)
    }

    async fn append_checkpoint(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint> {
        let response: CheckpointResponse = self.send(self.post("/trips/checkpoints").json(checkpoint)).await?;
        Ok(response.checkpoint)
    }

    async fn get_visits(&self, trip_id: i64) -> Result<Vec<Visit>> {
        let response: VisitsResponse = self.send(self.get("/gps/visits").query(&VisitQuery { trip_id })).await?;
        Ok(response.visits)
    }
}
