//! Authentication HTTP handlers
//!
//! The refresh endpoint is the server half of the client-side session
//! guard: one rotation call per expired token pair.

use axum::{extract::State, Json};

use crate::auth::{AuthError, AuthTokensResponse, RefreshTokenRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// POST /api/auth/refresh - Rotate an access/refresh token pair
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    let tokens = state
        .auth_service
        .refresh_tokens(&req.refresh_token)
        .map_err(|e| match e {
            AuthError::InvalidRefreshToken => ApiError::Unauthorized(e.to_string()),
            AuthError::TokenError(_) => ApiError::InternalError(e.to_string()),
        })?;

    Ok(Json(tokens))
}
