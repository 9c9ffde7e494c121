//! Ticket issuance and verification
//!
//! A ticket is a random 128-bit identifier assigned to a registration exactly
//! once, at confirmation. The identifier doubles as the idempotency key for
//! verification lookups.

use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::events::model::TicketVerification;

/// Ticket errors
#[derive(Error, Debug)]
pub enum TicketError {
    #[error("Ticket not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Generate a fresh ticket identifier
pub fn new_ticket_id() -> Uuid {
    Uuid::new_v4()
}

/// Short uppercase prefix of a ticket for display on receipts
pub fn display_code(ticket_id: &Uuid) -> String {
    ticket_id.simple().to_string()[..8].to_uppercase()
}

/// Assign a ticket to a registration if it does not have one yet.
///
/// Returns the registration's ticket, freshly generated or previously
/// assigned. The `ticket_id IS NULL` guard makes repeated calls safe.
pub async fn issue_ticket(
    tx: &mut Transaction<'_, Postgres>,
    registration_id: Uuid,
) -> Result<Uuid, sqlx::Error> {
    let candidate = new_ticket_id();

    let issued = sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE registrations
        SET ticket_id = $2, updated_at = now()
        WHERE id = $1 AND ticket_id IS NULL
        RETURNING ticket_id
        "#,
    )
    .bind(registration_id)
    .bind(candidate)
    .fetch_optional(&mut **tx)
    .await?;

    match issued {
        Some(ticket_id) => Ok(ticket_id),
        None => {
            // Already issued; return the existing ticket.
            sqlx::query_scalar::<_, Uuid>(
                "SELECT ticket_id FROM registrations WHERE id = $1 AND ticket_id IS NOT NULL",
            )
            .bind(registration_id)
            .fetch_one(&mut **tx)
            .await
        }
    }
}

/// Look up a ticket for self-service confirmation. Pure read.
pub async fn verify(pool: &PgPool, ticket_id: Uuid) -> Result<TicketVerification, TicketError> {
    let snapshot = sqlx::query_as::<_, TicketVerification>(
        r#"
        SELECT e.title AS event_title, r.status, r.registered_at
        FROM registrations r
        JOIN events e ON e.id = r.event_id
        WHERE r.ticket_id = $1
        "#,
    )
    .bind(ticket_id)
    .fetch_optional(pool)
    .await?
    .ok_or(TicketError::NotFound)?;

    Ok(snapshot)
}
