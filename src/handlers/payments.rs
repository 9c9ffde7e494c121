//! Payment HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::AuthenticatedUser;
use crate::error::ApiError;
use crate::events::model::{Event, RegistrationStatus};
use crate::payments::model::{
    CheckoutResponse, CouponCheckRequest, CouponCheckResponse, CreatePaymentRequest,
    PaymentSnapshot, PaymentStatus, SettleRequest,
};
use crate::payments::settlement::GatewayStatus;
use crate::state::AppState;

/// POST /api/payments/coupon/check - Quote a discount code for an event
pub async fn check_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CouponCheckRequest>,
) -> Result<Json<CouponCheckResponse>, ApiError> {
    request.validate()?;

    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(request.event_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))?;

    let quote = state
        .discount_service
        .quote(&event, user.user_id, Some(&request.code))
        .await?;

    Ok(Json(CouponCheckResponse {
        base_amount: quote.base_amount,
        discount_amount: quote.discount_amount,
        final_price: quote.final_price,
    }))
}

/// POST /api/payments/create - Open a checkout for a pending registration
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    request.validate()?;

    let checkout = state
        .payment_service
        .create_payment(
            request.event_id,
            user.user_id,
            &request.description,
            request.discount_code.as_deref(),
        )
        .await?;

    Ok(Json(checkout))
}

/// Query parameters of the gateway's return leg
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "Authority")]
    pub authority: String,
    #[serde(rename = "Status")]
    pub status: Option<String>,
}

/// GET /api/payments/callback - Gateway return leg
///
/// Unauthenticated: the payer arrives here by gateway redirect. The
/// outcome is communicated to the frontend through the redirect target.
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let gateway_ok = params.status.as_deref() == Some("OK");

    let outcome = state
        .settlement_service
        .reconcile_callback(&params.authority, gateway_ok)
        .await?;

    let url = if outcome.success {
        match outcome.ref_id {
            Some(ref_id) => format!(
                "{}?status=success&event_id={}&ref_id={}",
                state.frontend_callback_url, outcome.event_id, ref_id
            ),
            None => format!(
                "{}?status=success&event_id={}",
                state.frontend_callback_url, outcome.event_id
            ),
        }
    } else {
        format!(
            "{}?status=failed&event_id={}",
            state.frontend_callback_url, outcome.event_id
        )
    };

    Ok(Redirect::to(&url))
}

/// Settlement outcome response for the webhook
#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub ref_id: String,
    pub payment_status: PaymentStatus,
    pub registration_status: RegistrationStatus,
    pub ticket_id: Option<Uuid>,
    pub replayed: bool,
}

/// POST /api/payments/settle - Settlement webhook
///
/// Maps the gateway's push notification onto the idempotent reconciler.
/// Authenticated by shared secret; fail-closed when unconfigured.
pub async fn settle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SettleRequest>,
) -> Result<Json<SettleResponse>, ApiError> {
    match &state.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let provided = headers
                .get("X-Webhook-Secret")
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if provided != secret {
                return Err(ApiError::Unauthorized(
                    "Invalid webhook secret".to_string(),
                ));
            }
        }
        _ => {
            tracing::error!("Webhook secret not configured - rejecting settlement report");
            return Err(ApiError::ServiceUnavailable(
                "Webhook endpoint is not configured".to_string(),
            ));
        }
    }

    request.validate()?;

    let status = if request.status == "OK" {
        GatewayStatus::Success
    } else {
        GatewayStatus::Failure
    };

    let outcome = state
        .settlement_service
        .settle(&request.ref_id, status, request.amount)
        .await?;

    Ok(Json(SettleResponse {
        ref_id: outcome.ref_id,
        payment_status: outcome.payment_status,
        registration_status: outcome.registration_status,
        ticket_id: outcome.ticket_id,
        replayed: outcome.replayed,
    }))
}

/// GET /api/payments/by-ref/:ref_id - Settlement snapshot
pub async fn payment_by_ref(
    State(state): State<AppState>,
    Path(ref_id): Path<String>,
) -> Result<Json<PaymentSnapshot>, ApiError> {
    if ref_id.is_empty() {
        return Err(ApiError::BadRequest("Missing settlement reference".to_string()));
    }

    let snapshot = state.settlement_service.snapshot_by_ref(&ref_id).await?;

    Ok(Json(snapshot))
}
