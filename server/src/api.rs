use std::sync::Arc;

use axum::{
    extract::{rejection::{JsonRejection, PathRejection, QueryRejection}, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use field_trip_data_management::DataManagerError;
use field_trip_lib::{
    checkpoint::NewCheckpoint,
    comms::{
        CheckpointResponse, CheckpointsResponse, ErrorCode, ErrorResponse, TripResponse, TripsResponse,
        VisitQuery, VisitResponse, VisitsResponse,
    },
    trip::{EndTripRequest, StartTripRequest, TripFilter},
    visit::NewVisit,
};

use crate::{auth::AuthUser, server_state::ServerState};

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Data(DataManagerError),
}

impl From<DataManagerError> for ApiError {
    fn from(error: DataManagerError) -> Self {
        ApiError::Data(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, ErrorCode::BadRequest, message),
            ApiError::Data(DataManagerError::NotFound(message)) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, message),
            ApiError::Data(DataManagerError::Conflict(message)) => (StatusCode::CONFLICT, ErrorCode::Conflict, message),
            ApiError::Data(DataManagerError::InvalidState(message)) => (StatusCode::CONFLICT, ErrorCode::InvalidState, message),
            ApiError::Data(error) => {
                tracing::error!("Request failed: {}", error);
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, "Internal server error".to_string())
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

pub async fn start_trip(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Json(request), _): WithRejection<Json<StartTripRequest>, ApiError>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.data_manager.start_trip(user.user_id, &request, Utc::now()).await?;
    Ok(Json(TripResponse { success: true, trip: Some(trip) }))
}

pub async fn end_trip(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Path(trip_id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Json(request), _): WithRejection<Json<EndTripRequest>, ApiError>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.data_manager.end_trip(user.user_id, trip_id, &request, Utc::now()).await?;
    Ok(Json(TripResponse { success: true, trip: Some(trip) }))
}

pub async fn get_active_trip(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.data_manager.get_active_trip(user.user_id).await?;
    Ok(Json(TripResponse { success: true, trip }))
}

pub async fn get_trips(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Query(filter), _): WithRejection<Query<TripFilter>, ApiError>,
) -> Result<Json<TripsResponse>, ApiError> {
    let trips = state.data_manager.get_trips(user.user_id, &filter).await?;
    Ok(Json(TripsResponse { success: true, trips }))
}

pub async fn get_trip_checkpoints(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Path(trip_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<CheckpointsResponse>, ApiError> {
    let checkpoints = state.data_manager.get_trip_checkpoints(user.user_id, trip_id).await?;
    Ok(Json(CheckpointsResponse { success: true, checkpoints }))
}

pub async fn append_checkpoint(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Json(checkpoint), _): WithRejection<Json<NewCheckpoint>, ApiError>,
) -> Result<Json<CheckpointResponse>, ApiError> {
    let checkpoint = state.data_manager.append_checkpoint(user.user_id, &checkpoint, Utc::now()).await?;
    Ok(Json(CheckpointResponse { success: true, checkpoint }))
}

pub async fn get_visits(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Query(query), _): WithRejection<Query<VisitQuery>, ApiError>,
) -> Result<Json<VisitsResponse>, ApiError> {
    let visits = state.data_manager.get_trip_visits(user.user_id, query.trip_id).await?;
    Ok(Json(VisitsResponse { success: true, visits }))
}

pub async fn record_visit(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Json(visit), _): WithRejection<Json<NewVisit>, ApiError>,
) -> Result<Json<VisitResponse>, ApiError> {
    let visit = state.data_manager.record_visit(user.user_id, &visit, Utc::now()).await?;
    Ok(Json(VisitResponse { success: true, visit }))
}

pub async fn export_gpx(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    WithRejection(Path(trip_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Response, ApiError> {
    let gpx = state.data_manager.export_gpx(user.user_id, trip_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/gpx+xml")], gpx).into_response())
}
