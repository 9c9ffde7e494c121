//! Settlement reconciliation tests: idempotency, conflicts and seat retention

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::PgPool;
    use uuid::Uuid;

    use portico_server::config::{Config, Environment};
    use portico_server::events::RegistrationStatus;
    use portico_server::payments::settlement::SettlementError;
    use portico_server::payments::{
        GatewayClient, GatewayStatus, PaymentStatus, SettlementService,
    };

    /// Helper to create a test database pool
    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/portico_test".to_string());

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(4)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            environment: Environment::Development,
            port: 0,
            db_max_connections: 1,
            gateway_merchant_id: "test-merchant".to_string(),
            gateway_request_url: "http://localhost:9/request".to_string(),
            gateway_verify_url: "http://localhost:9/verify".to_string(),
            gateway_start_pay_url: "http://localhost:9/start/".to_string(),
            gateway_callback_url: "http://localhost:9/callback".to_string(),
            frontend_callback_url: "http://localhost:9/result".to_string(),
            webhook_secret: None,
            cors_allowed_origins: None,
            log_level: "info".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_access_token_ttl_seconds: 900,
            jwt_refresh_token_ttl_days: 7,
        }
    }

    fn settlement_service(pool: &PgPool) -> SettlementService {
        let gateway =
            Arc::new(GatewayClient::new(&test_config()).expect("failed to build gateway client"));
        SettlementService::new(pool.clone(), gateway)
    }

    struct Fixture {
        registration_id: Uuid,
        ref_id: String,
        amount: i64,
        discount_code_id: Option<Uuid>,
    }

    /// Insert an event, a pending registration and a pending payment with a
    /// bound settlement reference.
    async fn insert_pending_payment(pool: &PgPool, with_discount: bool) -> Fixture {
        let event_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO events (id, title, slug, status, base_price)
            VALUES ($1, 'Settled Event', $2, 'published', 50000)
            "#,
        )
        .bind(event_id)
        .bind(format!("settled-{}", event_id))
        .execute(pool)
        .await
        .unwrap();

        let discount_code_id = if with_discount {
            let code_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO discount_codes (id, code, kind, value, event_id)
                VALUES ($1, $2, 'percent', 20, $3)
                "#,
            )
            .bind(code_id)
            .bind(format!("CODE-{}", code_id))
            .bind(event_id)
            .execute(pool)
            .await
            .unwrap();
            Some(code_id)
        } else {
            None
        };

        let user_id = Uuid::new_v4();
        let registration_id = Uuid::new_v4();
        let amount = if with_discount { 40_000 } else { 50_000 };
        let discount_amount = 50_000 - amount;

        sqlx::query(
            r#"
            INSERT INTO registrations (
                id, event_id, user_id, status, discount_code_id,
                discount_amount, final_price
            )
            VALUES ($1, $2, $3, 'pending', $4, $5, $6)
            "#,
        )
        .bind(registration_id)
        .bind(event_id)
        .bind(user_id)
        .bind(discount_code_id)
        .bind(discount_amount)
        .bind(amount)
        .execute(pool)
        .await
        .unwrap();

        let payment_id = Uuid::new_v4();
        let ref_id = format!("ref-{}", payment_id.simple());
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, registration_id, event_id, user_id, base_amount,
                discount_code_id, discount_amount, amount, status, authority, ref_id
            )
            VALUES ($1, $2, $3, $4, 50000, $5, $6, $7, 'pending', $8, $9)
            "#,
        )
        .bind(payment_id)
        .bind(registration_id)
        .bind(event_id)
        .bind(user_id)
        .bind(discount_code_id)
        .bind(discount_amount)
        .bind(amount)
        .bind(format!("A{}", payment_id.simple()))
        .bind(&ref_id)
        .execute(pool)
        .await
        .unwrap();

        Fixture {
            registration_id,
            ref_id,
            amount,
            discount_code_id,
        }
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_settlement_is_idempotent() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);
        let fixture = insert_pending_payment(&pool, false).await;

        let first = service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount)
            .await
            .unwrap();
        assert!(!first.replayed);
        assert_eq!(first.payment_status, PaymentStatus::Paid);
        assert_eq!(first.registration_status, RegistrationStatus::Confirmed);
        let ticket = first.ticket_id.expect("ticket issued at confirmation");

        let second = service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount)
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.payment_status, PaymentStatus::Paid);
        assert_eq!(second.ticket_id, Some(ticket), "no second ticket is minted");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_failure_keeps_registration_pending() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);
        let fixture = insert_pending_payment(&pool, false).await;

        let outcome = service
            .settle(&fixture.ref_id, GatewayStatus::Failure, 0)
            .await
            .unwrap();

        assert_eq!(outcome.payment_status, PaymentStatus::Failed);
        // The seat is held for a payment retry; only an explicit
        // cancellation releases it.
        assert_eq!(outcome.registration_status, RegistrationStatus::Pending);
        assert!(outcome.ticket_id.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_conflicting_terminal_report_is_rejected() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);
        let fixture = insert_pending_payment(&pool, false).await;

        service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount)
            .await
            .unwrap();

        let conflict = service
            .settle(&fixture.ref_id, GatewayStatus::Failure, fixture.amount)
            .await;
        assert!(matches!(
            conflict.unwrap_err(),
            SettlementError::Conflict { .. }
        ));

        // The stored state is untouched by the conflicting report.
        let status: PaymentStatus =
            sqlx::query_scalar("SELECT status FROM payments WHERE ref_id = $1")
                .bind(&fixture.ref_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, PaymentStatus::Paid);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_unknown_reference_rejected() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);

        let result = service
            .settle("ref-does-not-exist", GatewayStatus::Success, 50_000)
            .await;
        assert!(matches!(
            result.unwrap_err(),
            SettlementError::UnknownReference(_)
        ));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_amount_mismatch_rejected() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);
        let fixture = insert_pending_payment(&pool, false).await;

        let result = service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount - 1)
            .await;
        assert!(matches!(
            result.unwrap_err(),
            SettlementError::AmountMismatch { .. }
        ));

        // Nothing was applied.
        let status: PaymentStatus =
            sqlx::query_scalar("SELECT status FROM payments WHERE ref_id = $1")
                .bind(&fixture.ref_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, PaymentStatus::Pending);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_discount_usage_counted_once() {
        let pool = setup_test_db().await;
        let service = settlement_service(&pool);
        let fixture = insert_pending_payment(&pool, true).await;
        let code_id = fixture.discount_code_id.unwrap();

        service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount)
            .await
            .unwrap();
        service
            .settle(&fixture.ref_id, GatewayStatus::Success, fixture.amount)
            .await
            .unwrap();

        let times_used: i32 =
            sqlx::query_scalar("SELECT times_used FROM discount_codes WHERE id = $1")
                .bind(code_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(times_used, 1, "replayed settlement must not double-count");

        let tickets: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations WHERE id = $1 AND ticket_id IS NOT NULL",
        )
        .bind(fixture.registration_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tickets, 1);
    }
}
