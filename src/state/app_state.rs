//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::AuthService;
use crate::events::RegistrationService;
use crate::payments::{DiscountService, PaymentService, SettlementService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registration_service: Arc<RegistrationService>,
    pub payment_service: Arc<PaymentService>,
    pub settlement_service: Arc<SettlementService>,
    pub discount_service: DiscountService,
    pub auth_service: Arc<AuthService>,
    pub db_pool: PgPool,
    pub frontend_callback_url: String,
    pub webhook_secret: Option<String>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_service: Arc<RegistrationService>,
        payment_service: Arc<PaymentService>,
        settlement_service: Arc<SettlementService>,
        discount_service: DiscountService,
        auth_service: Arc<AuthService>,
        db_pool: PgPool,
        frontend_callback_url: String,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            registration_service,
            payment_service,
            settlement_service,
            discount_service,
            auth_service,
            db_pool,
            frontend_callback_url,
            webhook_secret,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}
