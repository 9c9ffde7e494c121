//! Event registration route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/events/:id/register",
            post(handlers::register_for_event),
        )
        .route(
            "/api/events/:id/register",
            delete(handlers::cancel_registration),
        )
        .route("/api/events/:id/is-registered", get(handlers::is_registered))
        .route(
            "/api/events/my-registrations",
            get(handlers::my_registrations),
        )
        .route(
            "/api/events/registrations/verify/:ticket_id",
            get(handlers::verify_ticket),
        )
}
