use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use field_trip_data_management::hash_token;
use field_trip_lib::user::User;

use crate::{api::ApiError, server_state::ServerState};

/// The caller identified by the `Authorization: Bearer <token>` header.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<ServerState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ServerState>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        authenticate(state, bearer.token()).await.map(AuthUser)
    }
}

pub async fn authenticate(state: &ServerState, token: &str) -> Result<User, ApiError> {
    state
        .data_manager
        .find_user_by_token_hash(&hash_token(token))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown token".to_string()))
}
