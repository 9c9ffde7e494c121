//! Route definitions for the Portico API

mod auth;
mod events;
mod payments;

pub use auth::auth_routes;
pub use events::event_routes;
pub use payments::payment_routes;
