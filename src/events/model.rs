//! Event and registration models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::events::ticket;

/// Event model. Owned by the content-management side; the registration
/// engine reads it and atomically adjusts `seats_taken`.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub status: EventStatus,
    /// Price in minor currency units. 0 = free event.
    pub base_price: i64,
    /// None = unlimited capacity.
    pub capacity: Option<i32>,
    /// Seats currently held by non-cancelled registrations.
    pub seats_taken: i32,
    pub registration_starts_at: Option<DateTime<Utc>>,
    pub registration_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_free(&self) -> bool {
        self.base_price == 0
    }

    /// Whether the registration window is open at `now`. Missing bounds are
    /// treated as unbounded.
    pub fn registration_window_open(&self, now: DateTime<Utc>) -> bool {
        let started = self
            .registration_starts_at
            .map_or(true, |starts| now >= starts);
        let not_ended = self.registration_ends_at.map_or(true, |ends| now <= ends);
        started && not_ended
    }
}

/// Event lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

/// Registration model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    /// Assigned exactly once, at confirmation.
    pub ticket_id: Option<Uuid>,
    pub discount_code_id: Option<Uuid>,
    pub discount_amount: i64,
    pub final_price: i64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "registration_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Attended,
}

/// Request DTO for registering to an event
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(max = 64))]
    pub discount_code: Option<String>,
}

/// Response DTO for a registration
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: RegistrationStatus,
    pub ticket_id: Option<Uuid>,
    /// Short uppercase prefix of the ticket for display on receipts.
    pub ticket_code: Option<String>,
    pub discount_amount: i64,
    pub final_price: i64,
    pub registered_at: DateTime<Utc>,
}

impl From<Registration> for RegistrationResponse {
    fn from(reg: Registration) -> Self {
        let ticket_code = reg.ticket_id.as_ref().map(ticket::display_code);
        Self {
            id: reg.id,
            event_id: reg.event_id,
            status: reg.status,
            ticket_id: reg.ticket_id,
            ticket_code,
            discount_amount: reg.discount_amount,
            final_price: reg.final_price,
            registered_at: reg.registered_at,
        }
    }
}

/// Response DTO for the is-registered check
#[derive(Debug, Serialize)]
pub struct RegistrationStatusResponse {
    pub is_registered: bool,
}

/// Brief event info embedded in registration listings and payment snapshots
#[derive(Debug, Serialize, Clone)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub base_price: i64,
}

/// One row of the caller's registration history
#[derive(Debug, Serialize)]
pub struct MyRegistrationResponse {
    pub id: Uuid,
    pub status: RegistrationStatus,
    pub ticket_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub event: EventSummary,
}

/// Flat row backing `MyRegistrationResponse`
#[derive(Debug, sqlx::FromRow)]
pub struct RegistrationWithEvent {
    pub id: Uuid,
    pub status: RegistrationStatus,
    pub ticket_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub event_id: Uuid,
    pub event_title: String,
    pub event_slug: String,
    pub event_base_price: i64,
}

impl From<RegistrationWithEvent> for MyRegistrationResponse {
    fn from(row: RegistrationWithEvent) -> Self {
        Self {
            id: row.id,
            status: row.status,
            ticket_id: row.ticket_id,
            registered_at: row.registered_at,
            event: EventSummary {
                id: row.event_id,
                title: row.event_title,
                slug: row.event_slug,
                base_price: row.event_base_price,
            },
        }
    }
}

/// Self-service ticket verification snapshot
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TicketVerification {
    pub event_title: String,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
}
