use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::trace::TraceLayer;

use crate::server_state::ServerState;

pub mod api;
pub mod auth;
pub mod config;
pub mod server_state;
pub mod tracking_room;

pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/trips", get(api::get_trips))
        .route("/trips/start", post(api::start_trip))
        .route("/trips/active", get(api::get_active_trip))
        .route("/trips/checkpoints", post(api::append_checkpoint))
        .route("/trips/{trip_id}/end", post(api::end_trip))
        .route("/trips/{trip_id}/checkpoints", get(api::get_trip_checkpoints))
        .route("/trips/{trip_id}/gpx", get(api::export_gpx))
        .route("/gps/visits", get(api::get_visits).post(api::record_visit))
        .route("/tracking", get(tracking_room::tracking_socket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
