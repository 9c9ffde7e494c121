//! Payment route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/coupon/check", post(handlers::check_coupon))
        .route("/api/payments/create", post(handlers::create_payment))
        .route("/api/payments/callback", get(handlers::payment_callback))
        .route("/api/payments/settle", post(handlers::settle_webhook))
        .route("/api/payments/by-ref/:ref_id", get(handlers::payment_by_ref))
}
