//! API handlers for the Portico backend

pub mod auth;
mod events;
mod payments;

pub use auth::*;
pub use events::*;
pub use payments::*;

// Re-export AuthenticatedUser from middleware for handler use
pub use crate::middleware::auth::AuthenticatedUser;
