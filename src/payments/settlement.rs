//! Settlement reconciler - idempotent finalization of payments
//!
//! Gateway confirmations may arrive more than once, out of order with
//! client polling, or concurrently with retried webhook deliveries. All
//! paths converge by transitioning the Payment and its Registration in a
//! single transaction keyed by the unique `ref_id`, and by replaying the
//! stored outcome when a terminal report repeats.

use sqlx::{PgPool, Postgres, Transaction};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::events::model::{EventSummary, RegistrationStatus};
use crate::events::ticket;
use crate::payments::gateway::{GatewayClient, GatewayError};
use crate::payments::model::{Payment, PaymentSnapshot, PaymentState, PaymentStatus};

/// Terminal status reported by the gateway for a settlement reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failure,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "success",
            GatewayStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Unknown settlement reference: {0}")]
    UnknownReference(String),

    #[error("Unknown payment authority: {0}")]
    UnknownAuthority(String),

    #[error("Settlement conflict for {ref_id}: stored {stored}, reported {reported}")]
    Conflict {
        ref_id: String,
        stored: &'static str,
        reported: &'static str,
    },

    #[error("Settlement amount mismatch for {ref_id}: stored {stored}, reported {reported}")]
    AmountMismatch {
        ref_id: String,
        stored: i64,
        reported: i64,
    },

    #[error("Inconsistent payment record: {0}")]
    InconsistentRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a settlement, replayed or freshly applied
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub payment_id: Uuid,
    pub ref_id: String,
    pub payment_status: PaymentStatus,
    pub registration_status: RegistrationStatus,
    pub ticket_id: Option<Uuid>,
    /// True when the report matched an already-settled payment and no state
    /// was touched.
    pub replayed: bool,
}

/// Where the return-leg redirect should send the payer
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub success: bool,
    pub event_id: Uuid,
    pub ref_id: Option<String>,
}

/// What `settle` should do for a given stored state and incoming report
#[derive(Debug, PartialEq, Eq)]
enum SettlementPlan {
    Replay,
    ApplyPaid,
    ApplyFailed,
}

/// Pure transition decision. Terminal states replay on a matching report
/// and conflict on a differing one; only a pending payment applies.
fn plan_transition(
    state: &PaymentState,
    incoming: GatewayStatus,
    stored_amount: i64,
    reported_amount: i64,
    ref_id: &str,
) -> Result<SettlementPlan, SettlementError> {
    match (state, incoming) {
        (PaymentState::Paid { .. }, GatewayStatus::Success) => {
            if reported_amount != stored_amount {
                return Err(SettlementError::AmountMismatch {
                    ref_id: ref_id.to_string(),
                    stored: stored_amount,
                    reported: reported_amount,
                });
            }
            Ok(SettlementPlan::Replay)
        }
        (PaymentState::Paid { .. }, GatewayStatus::Failure) => Err(SettlementError::Conflict {
            ref_id: ref_id.to_string(),
            stored: "paid",
            reported: "failure",
        }),
        (PaymentState::Failed, GatewayStatus::Failure)
        | (PaymentState::Canceled, GatewayStatus::Failure) => Ok(SettlementPlan::Replay),
        (PaymentState::Failed, GatewayStatus::Success) => Err(SettlementError::Conflict {
            ref_id: ref_id.to_string(),
            stored: "failed",
            reported: "success",
        }),
        (PaymentState::Canceled, GatewayStatus::Success) => Err(SettlementError::Conflict {
            ref_id: ref_id.to_string(),
            stored: "canceled",
            reported: "success",
        }),
        (PaymentState::Pending { .. }, GatewayStatus::Success) => {
            if reported_amount != stored_amount {
                return Err(SettlementError::AmountMismatch {
                    ref_id: ref_id.to_string(),
                    stored: stored_amount,
                    reported: reported_amount,
                });
            }
            Ok(SettlementPlan::ApplyPaid)
        }
        (PaymentState::Pending { .. }, GatewayStatus::Failure) => Ok(SettlementPlan::ApplyFailed),
        // A ref_id bound to a payment that never reached pending.
        (PaymentState::Init, _) => Err(SettlementError::Conflict {
            ref_id: ref_id.to_string(),
            stored: "init",
            reported: incoming.as_str(),
        }),
    }
}

/// Settlement service reconciling gateway reports with stored payments
pub struct SettlementService {
    db_pool: PgPool,
    gateway: Arc<GatewayClient>,
}

impl SettlementService {
    pub fn new(db_pool: PgPool, gateway: Arc<GatewayClient>) -> Self {
        Self { db_pool, gateway }
    }

    /// Apply a terminal gateway report for `ref_id`. Idempotent: a repeated
    /// report replays the stored outcome without side effects; a conflicting
    /// report is surfaced for manual review, never merged.
    pub async fn settle(
        &self,
        ref_id: &str,
        status: GatewayStatus,
        amount: i64,
    ) -> Result<SettlementOutcome, SettlementError> {
        let mut tx = self.db_pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE ref_id = $1 FOR UPDATE",
        )
        .bind(ref_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SettlementError::UnknownReference(ref_id.to_string()))?;

        let state = payment
            .state()
            .map_err(|e| SettlementError::InconsistentRecord(e.to_string()))?;

        let plan = plan_transition(&state, status, payment.amount, amount, ref_id);

        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                if matches!(
                    err,
                    SettlementError::Conflict { .. } | SettlementError::AmountMismatch { .. }
                ) {
                    tracing::error!(
                        ref_id = %ref_id,
                        payment_id = %payment.id,
                        error = %err,
                        "Settlement conflict, leaving stored state untouched for manual review"
                    );
                }
                return Err(err);
            }
        };

        match plan {
            SettlementPlan::Replay => {
                let (registration_status, ticket_id) =
                    registration_snapshot(&mut tx, payment.registration_id).await?;

                Ok(SettlementOutcome {
                    payment_id: payment.id,
                    ref_id: ref_id.to_string(),
                    payment_status: payment.status,
                    registration_status,
                    ticket_id,
                    replayed: true,
                })
            }
            SettlementPlan::ApplyPaid => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = 'paid', verified_at = now(), updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(payment.id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE registrations
                    SET status = 'confirmed', updated_at = now()
                    WHERE id = $1 AND status = 'pending'
                    "#,
                )
                .bind(payment.registration_id)
                .execute(&mut *tx)
                .await?;

                let (registration_status, existing_ticket) =
                    registration_snapshot(&mut tx, payment.registration_id).await?;

                let ticket_id = match registration_status {
                    RegistrationStatus::Confirmed | RegistrationStatus::Attended => {
                        Some(ticket::issue_ticket(&mut tx, payment.registration_id).await?)
                    }
                    _ => {
                        // The registration left pending while the payment was
                        // in flight (cancelled by the user). The capture is
                        // still recorded; no ticket is minted and the
                        // mismatch is flagged for manual review.
                        tracing::warn!(
                            ref_id = %ref_id,
                            registration_id = %payment.registration_id,
                            status = ?registration_status,
                            "Settled payment for a registration that is no longer pending"
                        );
                        existing_ticket
                    }
                };

                // The code's usage counter moves here, at confirmation.
                if let Some(code_id) = payment.discount_code_id {
                    sqlx::query(
                        r#"
                        UPDATE discount_codes
                        SET times_used = times_used + 1, updated_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(code_id)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;

                tracing::info!(
                    ref_id = %ref_id,
                    payment_id = %payment.id,
                    registration_id = %payment.registration_id,
                    "Payment settled, registration confirmed"
                );

                Ok(SettlementOutcome {
                    payment_id: payment.id,
                    ref_id: ref_id.to_string(),
                    payment_status: PaymentStatus::Paid,
                    registration_status,
                    ticket_id,
                    replayed: false,
                })
            }
            SettlementPlan::ApplyFailed => {
                sqlx::query(
                    "UPDATE payments SET status = 'failed', updated_at = now() WHERE id = $1",
                )
                .bind(payment.id)
                .execute(&mut *tx)
                .await?;

                // The registration stays pending: the seat is held so the
                // user can retry payment. Only explicit cancellation frees
                // capacity.
                let (registration_status, ticket_id) =
                    registration_snapshot(&mut tx, payment.registration_id).await?;

                tx.commit().await?;

                tracing::info!(
                    ref_id = %ref_id,
                    payment_id = %payment.id,
                    "Payment failed, registration left pending for retry"
                );

                Ok(SettlementOutcome {
                    payment_id: payment.id,
                    ref_id: ref_id.to_string(),
                    payment_status: PaymentStatus::Failed,
                    registration_status,
                    ticket_id,
                    replayed: false,
                })
            }
        }
    }

    /// Reconcile the gateway's return leg, keyed by the session authority.
    ///
    /// The payer may hit this endpoint multiple times (reloads, history
    /// navigation); terminal payments short-circuit to their stored outcome.
    pub async fn reconcile_callback(
        &self,
        authority: &str,
        gateway_ok: bool,
    ) -> Result<CallbackOutcome, SettlementError> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE authority = $1")
                .bind(authority)
                .fetch_optional(&self.db_pool)
                .await?
                .ok_or_else(|| SettlementError::UnknownAuthority(authority.to_string()))?;

        let state = payment
            .state()
            .map_err(|e| SettlementError::InconsistentRecord(e.to_string()))?;

        match state {
            PaymentState::Paid { ref_id, .. } => Ok(CallbackOutcome {
                success: true,
                event_id: payment.event_id,
                ref_id: Some(ref_id),
            }),
            PaymentState::Failed | PaymentState::Canceled => Ok(CallbackOutcome {
                success: false,
                event_id: payment.event_id,
                ref_id: payment.ref_id,
            }),
            PaymentState::Init | PaymentState::Pending { .. } => {
                if !gateway_ok {
                    // The payer abandoned or the gateway declined before
                    // capture; nothing to verify.
                    self.close_by_authority(authority, PaymentStatus::Canceled)
                        .await?;
                    return Ok(CallbackOutcome {
                        success: false,
                        event_id: payment.event_id,
                        ref_id: None,
                    });
                }

                match self.gateway.verify(authority, payment.amount).await {
                    Ok(verified) => {
                        self.bind_reference(&payment, &verified.ref_id, verified.card_pan.as_deref())
                            .await?;
                        let outcome = self
                            .settle(&verified.ref_id, GatewayStatus::Success, payment.amount)
                            .await?;
                        Ok(CallbackOutcome {
                            success: true,
                            event_id: payment.event_id,
                            ref_id: Some(outcome.ref_id),
                        })
                    }
                    Err(GatewayError::VerificationDeclined(code)) => {
                        tracing::warn!(
                            authority = %authority,
                            code = code,
                            "Gateway declined verification"
                        );
                        self.close_by_authority(authority, PaymentStatus::Failed)
                            .await?;
                        Ok(CallbackOutcome {
                            success: false,
                            event_id: payment.event_id,
                            ref_id: None,
                        })
                    }
                    Err(err) => {
                        tracing::error!(
                            authority = %authority,
                            error = %err,
                            "Gateway verification unreachable, marking payment failed"
                        );
                        self.close_by_authority(authority, PaymentStatus::Failed)
                            .await?;
                        Ok(CallbackOutcome {
                            success: false,
                            event_id: payment.event_id,
                            ref_id: None,
                        })
                    }
                }
            }
        }
    }

    /// Settlement snapshot for the by-ref lookup, converging with whatever
    /// state the callback or webhook path has committed.
    pub async fn snapshot_by_ref(&self, ref_id: &str) -> Result<PaymentSnapshot, SettlementError> {
        #[derive(sqlx::FromRow)]
        struct SnapshotRow {
            ref_id: String,
            authority: Option<String>,
            base_amount: i64,
            discount_amount: i64,
            amount: i64,
            status: PaymentStatus,
            verified_at: Option<sqlx::types::chrono::DateTime<sqlx::types::chrono::Utc>>,
            event_id: Uuid,
            event_title: String,
            event_slug: String,
            event_base_price: i64,
        }

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT
                p.ref_id, p.authority, p.base_amount, p.discount_amount,
                p.amount, p.status, p.verified_at,
                e.id AS event_id,
                e.title AS event_title,
                e.slug AS event_slug,
                e.base_price AS event_base_price
            FROM payments p
            JOIN events e ON e.id = p.event_id
            WHERE p.ref_id = $1
            "#,
        )
        .bind(ref_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| SettlementError::UnknownReference(ref_id.to_string()))?;

        Ok(PaymentSnapshot {
            ref_id: row.ref_id,
            authority: row.authority,
            base_amount: row.base_amount,
            discount_amount: row.discount_amount,
            amount: row.amount,
            status: row.status.as_str().to_string(),
            verified_at: row.verified_at,
            event: EventSummary {
                id: row.event_id,
                title: row.event_title,
                slug: row.event_slug,
                base_price: row.event_base_price,
            },
        })
    }

    /// Bind the gateway's settlement reference to the payment. Set-once:
    /// re-binding the same reference is a no-op, a different one conflicts.
    async fn bind_reference(
        &self,
        payment: &Payment,
        ref_id: &str,
        card_pan: Option<&str>,
    ) -> Result<(), SettlementError> {
        let bound = sqlx::query(
            r#"
            UPDATE payments
            SET ref_id = $2, card_pan = COALESCE($3, card_pan), updated_at = now()
            WHERE id = $1 AND (ref_id IS NULL OR ref_id = $2)
            "#,
        )
        .bind(payment.id)
        .bind(ref_id)
        .bind(card_pan)
        .execute(&self.db_pool)
        .await?;

        if bound.rows_affected() == 0 {
            return Err(SettlementError::Conflict {
                ref_id: ref_id.to_string(),
                stored: "different reference already bound",
                reported: "success",
            });
        }

        Ok(())
    }

    /// Close a not-yet-settled payment by its authority. Pre-settlement
    /// legs only: terminal payments are never touched.
    async fn close_by_authority(
        &self,
        authority: &str,
        status: PaymentStatus,
    ) -> Result<(), SettlementError> {
        sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, updated_at = now()
            WHERE authority = $1 AND status IN ('init', 'pending')
            "#,
        )
        .bind(authority)
        .bind(status)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

async fn registration_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    registration_id: Uuid,
) -> Result<(RegistrationStatus, Option<Uuid>), sqlx::Error> {
    sqlx::query_as::<_, (RegistrationStatus, Option<Uuid>)>(
        "SELECT status, ticket_id FROM registrations WHERE id = $1",
    )
    .bind(registration_id)
    .fetch_one(&mut **tx)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending() -> PaymentState {
        PaymentState::Pending {
            authority: "A000000123".to_string(),
        }
    }

    fn paid() -> PaymentState {
        PaymentState::Paid {
            ref_id: "ref-abc123".to_string(),
            verified_at: Utc::now(),
        }
    }

    #[test]
    fn test_pending_success_applies() {
        let plan = plan_transition(&pending(), GatewayStatus::Success, 50_000, 50_000, "r");
        assert_eq!(plan.unwrap(), SettlementPlan::ApplyPaid);
    }

    #[test]
    fn test_pending_failure_applies_failed() {
        let plan = plan_transition(&pending(), GatewayStatus::Failure, 50_000, 0, "r");
        assert_eq!(plan.unwrap(), SettlementPlan::ApplyFailed);
    }

    #[test]
    fn test_repeated_success_replays() {
        let plan = plan_transition(&paid(), GatewayStatus::Success, 50_000, 50_000, "r");
        assert_eq!(plan.unwrap(), SettlementPlan::Replay);
    }

    #[test]
    fn test_conflicting_terminal_status_rejected() {
        let err = plan_transition(&paid(), GatewayStatus::Failure, 50_000, 50_000, "r");
        assert!(matches!(err, Err(SettlementError::Conflict { .. })));

        let err = plan_transition(&PaymentState::Failed, GatewayStatus::Success, 50_000, 50_000, "r");
        assert!(matches!(err, Err(SettlementError::Conflict { .. })));
    }

    #[test]
    fn test_amount_mismatch_rejected() {
        let err = plan_transition(&pending(), GatewayStatus::Success, 50_000, 49_000, "r");
        assert!(matches!(err, Err(SettlementError::AmountMismatch { .. })));

        // Replays check the amount too.
        let err = plan_transition(&paid(), GatewayStatus::Success, 50_000, 49_000, "r");
        assert!(matches!(err, Err(SettlementError::AmountMismatch { .. })));
    }

    #[test]
    fn test_repeated_failure_replays() {
        let plan = plan_transition(&PaymentState::Failed, GatewayStatus::Failure, 50_000, 0, "r");
        assert_eq!(plan.unwrap(), SettlementPlan::Replay);

        let plan = plan_transition(&PaymentState::Canceled, GatewayStatus::Failure, 50_000, 0, "r");
        assert_eq!(plan.unwrap(), SettlementPlan::Replay);
    }

    #[test]
    fn test_init_with_reference_conflicts() {
        let err = plan_transition(&PaymentState::Init, GatewayStatus::Success, 50_000, 50_000, "r");
        assert!(matches!(err, Err(SettlementError::Conflict { .. })));
    }
}
