//! Registration service - admission control for capacity-bounded events
//!
//! Capacity is enforced through the store, never through read-then-write
//! logic: the seat counter moves with a conditional UPDATE and the
//! per-(event, user) uniqueness is backed by a partial unique index, both
//! inside one transaction. Concurrent admissions racing for the last seat
//! are serialized by the row lock the conditional UPDATE takes.

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::model::{
    Event, EventStatus, MyRegistrationResponse, Registration, RegistrationStatus,
    RegistrationWithEvent,
};
use crate::events::ticket;
use crate::payments::discount::{DiscountError, DiscountService};

/// Admission errors
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Event not found")]
    EventNotFound,

    #[error("Event is not open for registration")]
    EventNotPublished,

    #[error("Registration window is closed")]
    RegistrationClosed,

    #[error("Event capacity exceeded")]
    CapacityExceeded,

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("No active registration for this event")]
    NotRegistered,

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Unique-violation SQLSTATE, raised by the partial unique index on
/// (event_id, user_id) for non-cancelled registrations.
const UNIQUE_VIOLATION: &str = "23505";

/// Registration service managing the admission lifecycle
pub struct RegistrationService {
    db_pool: PgPool,
    discount_service: DiscountService,
}

impl RegistrationService {
    pub fn new(db_pool: PgPool, discount_service: DiscountService) -> Self {
        Self {
            db_pool,
            discount_service,
        }
    }

    /// Register a user for an event, enforcing window, uniqueness and
    /// capacity. Free outcomes are confirmed immediately with a ticket;
    /// priced outcomes are created pending, awaiting payment.
    pub async fn register(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        discount_code: Option<&str>,
    ) -> Result<Registration, AdmissionError> {
        let event = self.get_event(event_id).await?;

        if event.status != EventStatus::Published {
            return Err(AdmissionError::EventNotPublished);
        }
        if !event.registration_window_open(Utc::now()) {
            return Err(AdmissionError::RegistrationClosed);
        }

        let quote = self
            .discount_service
            .quote(&event, user_id, discount_code)
            .await?;

        let mut tx = self.db_pool.begin().await?;

        // Conditional seat increment. Zero rows affected means the last
        // seat went to a concurrent admission.
        let admitted = sqlx::query(
            r#"
            UPDATE events
            SET seats_taken = seats_taken + 1, updated_at = now()
            WHERE id = $1
              AND status = 'published'
              AND (capacity IS NULL OR seats_taken < capacity)
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        if admitted.rows_affected() == 0 {
            return Err(AdmissionError::CapacityExceeded);
        }

        let (status, ticket_id) = if quote.final_price == 0 {
            (RegistrationStatus::Confirmed, Some(ticket::new_ticket_id()))
        } else {
            (RegistrationStatus::Pending, None)
        };

        let registration = sqlx::query_as::<_, Registration>(
            r#"
            INSERT INTO registrations (
                id, event_id, user_id, status, ticket_id,
                discount_code_id, discount_amount, final_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(user_id)
        .bind(status)
        .bind(ticket_id)
        .bind(quote.code_id)
        .bind(quote.discount_amount)
        .bind(quote.final_price)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        tx.commit().await?;

        tracing::info!(
            event_id = %event_id,
            user_id = %user_id,
            registration_id = %registration.id,
            status = ?registration.status,
            "Registration admitted"
        );

        Ok(registration)
    }

    /// Cancel the caller's live registration and release the seat.
    pub async fn cancel(&self, event_id: Uuid, user_id: Uuid) -> Result<(), AdmissionError> {
        let mut tx = self.db_pool.begin().await?;

        let cancelled = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE registrations
            SET status = 'cancelled', updated_at = now()
            WHERE event_id = $1 AND user_id = $2
              AND status IN ('pending', 'confirmed')
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let registration_id = cancelled.ok_or(AdmissionError::NotRegistered)?;

        // Release the seat in the same transaction so it becomes visible
        // to new admission attempts atomically with the cancellation.
        sqlx::query(
            r#"
            UPDATE events
            SET seats_taken = GREATEST(seats_taken - 1, 0), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            event_id = %event_id,
            user_id = %user_id,
            registration_id = %registration_id,
            "Registration cancelled, seat released"
        );

        Ok(())
    }

    /// Whether the user holds a confirmed registration for the event.
    pub async fn is_registered(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AdmissionError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM registrations
                WHERE event_id = $1 AND user_id = $2 AND status = 'confirmed'
            )
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(exists)
    }

    /// The caller's registration history with event summaries.
    pub async fn my_registrations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<MyRegistrationResponse>, AdmissionError> {
        let rows = sqlx::query_as::<_, RegistrationWithEvent>(
            r#"
            SELECT
                r.id, r.status, r.ticket_id, r.registered_at,
                e.id AS event_id,
                e.title AS event_title,
                e.slug AS event_slug,
                e.base_price AS event_base_price
            FROM registrations r
            JOIN events e ON e.id = r.event_id
            WHERE r.user_id = $1
            ORDER BY r.registered_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(MyRegistrationResponse::from).collect())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Event, AdmissionError> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(AdmissionError::EventNotFound)
    }
}

/// Translate the unique-index violation on (event_id, user_id) into the
/// admission conflict it represents. First writer wins; the seat increment
/// rolls back with the transaction.
fn map_unique_violation(err: sqlx::Error) -> AdmissionError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return AdmissionError::AlreadyRegistered;
        }
    }
    AdmissionError::Database(err)
}
