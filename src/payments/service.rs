//! Payment service - checkout orchestration
//!
//! Opens gateway sessions for pending registrations. The quote is
//! recomputed at checkout time, so a code that expired or became valid
//! between the coupon check and the purchase is honored as it stands now.
//! A recomputed total of zero confirms the registration without touching
//! the gateway.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::model::{Event, Registration, RegistrationStatus};
use crate::events::ticket;
use crate::payments::discount::{DiscountError, DiscountService, Quote};
use crate::payments::gateway::{GatewayClient, GatewayError, SessionMetadata};
use crate::payments::model::{CheckoutResponse, Payment};

/// Payment orchestration errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Event not found")]
    EventNotFound,

    #[error("No pending registration for this event")]
    RegistrationNotPending,

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Payment service opening gateway sessions for pending registrations
pub struct PaymentService {
    db_pool: PgPool,
    discount_service: DiscountService,
    gateway: Arc<GatewayClient>,
}

impl PaymentService {
    pub fn new(
        db_pool: PgPool,
        discount_service: DiscountService,
        gateway: Arc<GatewayClient>,
    ) -> Self {
        Self {
            db_pool,
            discount_service,
            gateway,
        }
    }

    /// Open a checkout for the caller's pending registration.
    pub async fn create_payment(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        description: &str,
        discount_code: Option<&str>,
    ) -> Result<CheckoutResponse, PaymentError> {
        let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(PaymentError::EventNotFound)?;

        let registration = sqlx::query_as::<_, Registration>(
            r#"
            SELECT * FROM registrations
            WHERE event_id = $1 AND user_id = $2 AND status <> 'cancelled'
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(PaymentError::RegistrationNotPending)?;

        if registration.status != RegistrationStatus::Pending {
            return Err(PaymentError::RegistrationNotPending);
        }

        let quote = self
            .discount_service
            .quote(&event, user_id, discount_code)
            .await?;

        if quote.final_price == 0 {
            // The discount covers the whole price; complete as a free
            // checkout without a gateway session or a payment row.
            self.confirm_free_checkout(&registration, &quote).await?;

            return Ok(CheckoutResponse {
                start_pay_url: None,
                authority: None,
                base_amount: quote.base_amount,
                discount_amount: quote.discount_amount,
                amount: 0,
            });
        }

        // Keep the registration's pricing in step with what will be charged.
        sqlx::query(
            r#"
            UPDATE registrations
            SET discount_code_id = $2, discount_amount = $3, final_price = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(registration.id)
        .bind(quote.code_id)
        .bind(quote.discount_amount)
        .bind(quote.final_price)
        .execute(&self.db_pool)
        .await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, registration_id, event_id, user_id,
                base_amount, discount_code_id, discount_amount, amount, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'init')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(registration.id)
        .bind(event_id)
        .bind(user_id)
        .bind(quote.base_amount)
        .bind(quote.code_id)
        .bind(quote.discount_amount)
        .bind(quote.final_price)
        .fetch_one(&self.db_pool)
        .await?;

        let metadata = SessionMetadata {
            event_id,
            user_id,
            payment_id: payment.id,
            discount_code: discount_code.map(str::to_string),
        };

        let authority = match self
            .gateway
            .request_session(quote.final_price, description, &metadata)
            .await
        {
            Ok(authority) => authority,
            Err(err) => {
                // The seat stays held: the registration remains pending and
                // the caller may retry checkout.
                if let Err(close_err) = self.close_payment(payment.id).await {
                    tracing::error!(
                        payment_id = %payment.id,
                        error = %close_err,
                        "Failed to close payment after gateway rejection"
                    );
                }
                return Err(PaymentError::Gateway(err));
            }
        };

        sqlx::query(
            r#"
            UPDATE payments
            SET authority = $2, status = 'pending', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(payment.id)
        .bind(&authority)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            payment_id = %payment.id,
            registration_id = %registration.id,
            amount = quote.final_price,
            "Gateway session opened"
        );

        Ok(CheckoutResponse {
            start_pay_url: Some(self.gateway.start_pay_url(&authority)),
            authority: Some(authority),
            base_amount: quote.base_amount,
            discount_amount: quote.discount_amount,
            amount: quote.final_price,
        })
    }

    /// Confirm a registration whose discounted total reached zero: ticket
    /// and confirmation in one transaction, no payment row.
    async fn confirm_free_checkout(
        &self,
        registration: &Registration,
        quote: &Quote,
    ) -> Result<(), PaymentError> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE registrations
            SET status = 'confirmed', discount_code_id = $2, discount_amount = $3,
                final_price = 0, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(registration.id)
        .bind(quote.code_id)
        .bind(quote.discount_amount)
        .execute(&mut *tx)
        .await?;

        ticket::issue_ticket(&mut tx, registration.id).await?;

        tx.commit().await?;

        tracing::info!(
            registration_id = %registration.id,
            "Zero-amount checkout confirmed without gateway session"
        );

        Ok(())
    }

    async fn close_payment(&self, payment_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE payments SET status = 'canceled', updated_at = now() WHERE id = $1",
        )
        .bind(payment_id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}
