//! Discount resolver - coupon validation and price quoting
//!
//! Quoting is a pure, idempotent read. Usage counters move only when a
//! registration carrying the code is confirmed at settlement, so a slow
//! payer cannot exhaust a code they never finish paying with.

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::model::Event;
use crate::payments::model::{DiscountCode, DiscountKind};

/// Smallest non-zero total the gateway accepts, in minor currency units.
pub const MIN_PAYABLE_AMOUNT: i64 = 10_000;

/// Discount resolution errors
#[derive(Error, Debug)]
pub enum DiscountError {
    #[error("Invalid or inactive discount code")]
    InvalidCode,

    #[error("Discount code is not active yet")]
    CodeNotYetActive,

    #[error("Discount code has expired")]
    CodeExpired,

    #[error("Discount code usage limit reached")]
    CodeExhausted,

    #[error("Discount code is not applicable to this event")]
    CodeNotApplicable,

    #[error("Order amount is below the minimum for this code")]
    BelowMinimumAmount,

    #[error("Discount code already used the maximum allowed times")]
    PerUserLimitReached,

    #[error("Discounted total would be below the minimum payable amount")]
    BelowMinimumPayable,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Priced quote for an event, with an optional applied code
#[derive(Debug, Clone)]
pub struct Quote {
    pub base_amount: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    /// The applied code, when one was given and validated.
    pub code_id: Option<Uuid>,
}

impl Quote {
    fn undiscounted(base_amount: i64) -> Self {
        Self {
            base_amount,
            discount_amount: 0,
            final_price: base_amount,
            code_id: None,
        }
    }
}

/// Discount service resolving coupon codes into quotes
#[derive(Clone)]
pub struct DiscountService {
    db_pool: PgPool,
}

impl DiscountService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Price an event for a user, applying `code` when given. No side
    /// effects; safe to call repeatedly and concurrently.
    pub async fn quote(
        &self,
        event: &Event,
        user_id: Uuid,
        code: Option<&str>,
    ) -> Result<Quote, DiscountError> {
        let code = match code {
            Some(c) if !c.trim().is_empty() => c.trim(),
            _ => return Ok(Quote::undiscounted(event.base_price)),
        };

        // A free event has nothing to discount.
        if event.is_free() {
            return Ok(Quote::undiscounted(0));
        }

        let rule = sqlx::query_as::<_, DiscountCode>(
            "SELECT * FROM discount_codes WHERE code = $1 AND is_active = TRUE",
        )
        .bind(code)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(DiscountError::InvalidCode)?;

        self.validate_rule(&rule, event, user_id).await?;

        let discount_amount = apply_rule(rule.kind, rule.value, rule.max_discount, event.base_price);
        let final_price = (event.base_price - discount_amount).max(0);

        if final_price > 0 && final_price < MIN_PAYABLE_AMOUNT {
            return Err(DiscountError::BelowMinimumPayable);
        }

        Ok(Quote {
            base_amount: event.base_price,
            discount_amount,
            final_price,
            code_id: Some(rule.id),
        })
    }

    async fn validate_rule(
        &self,
        rule: &DiscountCode,
        event: &Event,
        user_id: Uuid,
    ) -> Result<(), DiscountError> {
        if let Some(scoped_event) = rule.event_id {
            if scoped_event != event.id {
                return Err(DiscountError::CodeNotApplicable);
            }
        }

        let now = Utc::now();
        if let Some(starts_at) = rule.starts_at {
            if now < starts_at {
                return Err(DiscountError::CodeNotYetActive);
            }
        }
        if let Some(ends_at) = rule.ends_at {
            if now > ends_at {
                return Err(DiscountError::CodeExpired);
            }
        }

        if let Some(min_amount) = rule.min_amount {
            if event.base_price < min_amount {
                return Err(DiscountError::BelowMinimumAmount);
            }
        }

        if let Some(limit) = rule.usage_limit_total {
            if rule.times_used >= limit {
                return Err(DiscountError::CodeExhausted);
            }
        }

        if let Some(per_user_limit) = rule.usage_limit_per_user {
            let used_by_user = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM payments
                WHERE discount_code_id = $1 AND user_id = $2 AND status = 'paid'
                "#,
            )
            .bind(rule.id)
            .bind(user_id)
            .fetch_one(&self.db_pool)
            .await?;

            if used_by_user >= per_user_limit as i64 {
                return Err(DiscountError::PerUserLimitReached);
            }
        }

        Ok(())
    }
}

/// Compute the discount a rule grants on a base amount. A fixed discount is
/// clamped to the base; a percentage discount is capped by `max_discount`.
pub fn apply_rule(kind: DiscountKind, value: i64, max_discount: Option<i64>, base: i64) -> i64 {
    match kind {
        DiscountKind::Fixed => value.min(base),
        DiscountKind::Percent => {
            let discount = base * value / 100;
            match max_discount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_cap_binds() {
        // 20% of 100_000 is 20_000, capped at 10_000.
        let discount = apply_rule(DiscountKind::Percent, 20, Some(10_000), 100_000);
        assert_eq!(discount, 10_000);
        assert_eq!(100_000 - discount, 90_000);
    }

    #[test]
    fn test_percent_cap_slack() {
        // 20% of 30_000 is 6_000, below the cap.
        let discount = apply_rule(DiscountKind::Percent, 20, Some(10_000), 30_000);
        assert_eq!(discount, 6_000);
        assert_eq!(30_000 - discount, 24_000);
    }

    #[test]
    fn test_percent_without_cap() {
        let discount = apply_rule(DiscountKind::Percent, 50, None, 80_000);
        assert_eq!(discount, 40_000);
    }

    #[test]
    fn test_fixed_clamped_to_base() {
        let discount = apply_rule(DiscountKind::Fixed, 150_000, None, 100_000);
        assert_eq!(discount, 100_000);
    }

    #[test]
    fn test_fixed_below_base() {
        let discount = apply_rule(DiscountKind::Fixed, 25_000, None, 100_000);
        assert_eq!(discount, 25_000);
    }

    #[test]
    fn test_full_discount_reaches_zero() {
        let discount = apply_rule(DiscountKind::Fixed, 1_000, None, 1_000);
        assert_eq!((1_000 - discount).max(0), 0);
    }
}
