//! Event registration HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use super::AuthenticatedUser;
use crate::error::ApiError;
use crate::events::model::{
    MyRegistrationResponse, RegisterRequest, RegistrationResponse, RegistrationStatusResponse,
    TicketVerification,
};
use crate::events::ticket;
use crate::state::AppState;

/// Message response for actions without a payload
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/events/:id/register - Register the caller for an event
pub async fn register_for_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    body: Option<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    request.validate()?;

    let registration = state
        .registration_service
        .register(event_id, user.user_id, request.discount_code.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(registration.into())))
}

/// DELETE /api/events/:id/register - Cancel the caller's registration
pub async fn cancel_registration(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .registration_service
        .cancel(event_id, user.user_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Registration cancelled".to_string(),
    }))
}

/// GET /api/events/:id/is-registered - Confirmed-registration check
pub async fn is_registered(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<RegistrationStatusResponse>, ApiError> {
    let is_registered = state
        .registration_service
        .is_registered(event_id, user.user_id)
        .await?;

    Ok(Json(RegistrationStatusResponse { is_registered }))
}

/// GET /api/events/my-registrations - The caller's registration history
pub async fn my_registrations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<MyRegistrationResponse>>, ApiError> {
    let registrations = state
        .registration_service
        .my_registrations(user.user_id)
        .await?;

    Ok(Json(registrations))
}

/// GET /api/events/registrations/verify/:ticket_id - Ticket verification
pub async fn verify_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketVerification>, ApiError> {
    let snapshot = ticket::verify(&state.db_pool, ticket_id).await?;

    Ok(Json(snapshot))
}
