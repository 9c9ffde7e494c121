//! Payment and discount-code models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::events::model::EventSummary;

/// Payment row. A registration may have zero payments (free event) or
/// several (retries after a failure).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub base_amount: i64,
    pub discount_code_id: Option<Uuid>,
    pub discount_amount: i64,
    /// `amount = base_amount - discount_amount`, enforced by a CHECK.
    pub amount: i64,
    pub status: PaymentStatus,
    /// Gateway session token, set when the session opens.
    pub authority: Option<String>,
    /// Gateway settlement reference, set once at verification.
    pub ref_id: Option<String>,
    pub card_pan: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment lifecycle status as stored
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Init,
    Pending,
    Paid,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Init => "init",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

/// Domain view of a payment's lifecycle. The variants carry the data that
/// must exist in that state, so a paid payment without a settlement
/// reference is unrepresentable here even though the row type is flat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentState {
    Init,
    Pending { authority: String },
    Paid { ref_id: String, verified_at: DateTime<Utc> },
    Failed,
    Canceled,
}

/// A stored payment row that violates the per-status data requirements
#[derive(Error, Debug)]
#[error("payment {id} is in an inconsistent state: {reason}")]
pub struct InvalidPaymentRow {
    pub id: Uuid,
    pub reason: &'static str,
}

impl Payment {
    /// Project the flat row onto the per-status domain state.
    pub fn state(&self) -> Result<PaymentState, InvalidPaymentRow> {
        match self.status {
            PaymentStatus::Init => Ok(PaymentState::Init),
            PaymentStatus::Pending => {
                let authority = self.authority.clone().ok_or(InvalidPaymentRow {
                    id: self.id,
                    reason: "pending without authority",
                })?;
                Ok(PaymentState::Pending { authority })
            }
            PaymentStatus::Paid => {
                let ref_id = self.ref_id.clone().ok_or(InvalidPaymentRow {
                    id: self.id,
                    reason: "paid without ref_id",
                })?;
                let verified_at = self.verified_at.ok_or(InvalidPaymentRow {
                    id: self.id,
                    reason: "paid without verified_at",
                })?;
                Ok(PaymentState::Paid {
                    ref_id,
                    verified_at,
                })
            }
            PaymentStatus::Failed => Ok(PaymentState::Failed),
            PaymentStatus::Canceled => Ok(PaymentState::Canceled),
        }
    }
}

/// Discount code row. Read-only input to the resolver; `times_used` moves
/// only inside the settlement transaction.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct DiscountCode {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    pub max_discount: Option<i64>,
    pub min_amount: Option<i64>,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub usage_limit_total: Option<i32>,
    pub usage_limit_per_user: Option<i32>,
    pub times_used: i32,
    /// None = usable on any event.
    pub event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Discount rule kind
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "discount_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percent,
    Fixed,
}

/// Request DTO for checking a coupon against an event
#[derive(Debug, Deserialize, Validate)]
pub struct CouponCheckRequest {
    pub event_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

/// Response DTO for a coupon check
#[derive(Debug, Serialize)]
pub struct CouponCheckResponse {
    pub base_amount: i64,
    pub discount_amount: i64,
    pub final_price: i64,
}

/// Request DTO for opening a checkout
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub event_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[validate(length(max = 64))]
    pub discount_code: Option<String>,
}

/// Response DTO for a checkout. `start_pay_url` is absent when the
/// discounted total reached zero and the registration was confirmed
/// without contacting the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub start_pay_url: Option<String>,
    pub authority: Option<String>,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub amount: i64,
}

/// Settlement webhook body, mapped directly onto the reconciler
#[derive(Debug, Deserialize, Validate)]
pub struct SettleRequest {
    #[validate(length(min = 1, max = 64))]
    pub ref_id: String,
    /// "OK" for a successful capture, anything else is a failure report.
    pub status: String,
    pub amount: i64,
}

/// Settlement snapshot returned by the by-ref lookup
#[derive(Debug, Serialize)]
pub struct PaymentSnapshot {
    pub ref_id: String,
    pub authority: Option<String>,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub amount: i64,
    pub status: String,
    pub verified_at: Option<DateTime<Utc>>,
    pub event: EventSummary,
}
