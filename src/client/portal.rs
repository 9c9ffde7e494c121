//! Portal HTTP client
//!
//! Typed access to the registration and payment endpoints. Authenticated
//! requests carry the guard's current access token; a 401 triggers the
//! single-flight refresh and exactly one retry with the new token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::session::{SessionError, SessionGuard, TokenPair, TokenRefresher};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response {status}: {body}")]
    Api { status: StatusCode, body: String },
}

/// Registration as seen by the client
#[derive(Debug, Deserialize)]
pub struct RegistrationView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: String,
    pub ticket_id: Option<Uuid>,
    pub ticket_code: Option<String>,
    pub discount_amount: i64,
    pub final_price: i64,
}

/// Coupon quote as seen by the client
#[derive(Debug, Deserialize)]
pub struct CouponQuote {
    pub base_amount: i64,
    pub discount_amount: i64,
    pub final_price: i64,
}

/// Checkout session as seen by the client. `start_pay_url` is absent when
/// the server confirmed the registration without a gateway session.
#[derive(Debug, Deserialize)]
pub struct CheckoutView {
    pub start_pay_url: Option<String>,
    pub authority: Option<String>,
    pub base_amount: i64,
    pub discount_amount: i64,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
struct IsRegisteredView {
    is_registered: bool,
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    discount_code: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CouponCheckBody<'a> {
    event_id: Uuid,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePaymentBody<'a> {
    event_id: Uuid,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    discount_code: Option<&'a str>,
}

/// Refresher posting to the portal's token-rotation endpoint
struct HttpRefresher {
    http: reqwest::Client,
    refresh_url: String,
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
        #[derive(Serialize)]
        struct Body<'a> {
            refresh_token: &'a str,
        }

        #[derive(Deserialize)]
        struct Tokens {
            access_token: String,
            refresh_token: String,
        }

        let response = self
            .http
            .post(&self.refresh_url)
            .json(&Body { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("refresh rejected with status {}", response.status());
        }

        let tokens: Tokens = response.json().await?;
        Ok(TokenPair {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        })
    }
}

/// Authenticated client for the portal API
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionGuard,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, tokens: TokenPair) -> Result<Self, reqwest::Error> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let refresher = Arc::new(HttpRefresher {
            http: http.clone(),
            refresh_url: format!("{}/api/auth/refresh", base_url),
        });

        Ok(Self {
            http,
            base_url,
            session: SessionGuard::new(tokens, refresher),
        })
    }

    /// Register for an event, optionally with a discount code.
    pub async fn register(
        &self,
        event_id: Uuid,
        discount_code: Option<&str>,
    ) -> Result<RegistrationView, ClientError> {
        let url = format!("{}/api/events/{}/register", self.base_url, event_id);
        let body = RegisterBody { discount_code };

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        decode(response).await
    }

    /// Cancel the caller's registration, releasing the seat.
    pub async fn cancel_registration(&self, event_id: Uuid) -> Result<(), ClientError> {
        let url = format!("{}/api/events/{}/register", self.base_url, event_id);

        let response = self.send_authorized(|http| http.delete(&url)).await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Whether the caller holds a confirmed registration.
    pub async fn is_registered(&self, event_id: Uuid) -> Result<bool, ClientError> {
        let url = format!("{}/api/events/{}/is-registered", self.base_url, event_id);

        let response = self.send_authorized(|http| http.get(&url)).await?;
        let view: IsRegisteredView = decode(response).await?;
        Ok(view.is_registered)
    }

    /// Quote a discount code against an event.
    pub async fn check_coupon(
        &self,
        event_id: Uuid,
        code: &str,
    ) -> Result<CouponQuote, ClientError> {
        let url = format!("{}/api/payments/coupon/check", self.base_url);
        let body = CouponCheckBody { event_id, code };

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        decode(response).await
    }

    /// Open a checkout. A response without `start_pay_url` is a completed
    /// free registration, not an error.
    pub async fn create_payment(
        &self,
        event_id: Uuid,
        description: &str,
        discount_code: Option<&str>,
    ) -> Result<CheckoutView, ClientError> {
        let url = format!("{}/api/payments/create", self.base_url);
        let body = CreatePaymentBody {
            event_id,
            description,
            discount_code,
        };

        let response = self
            .send_authorized(|http| http.post(&url).json(&body))
            .await?;
        decode(response).await
    }

    /// Send a request with the current access token; on a 401, run the
    /// single-flight refresh and retry exactly once.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let tokens = self.session.current().await;
        let response = build(&self.http)
            .bearer_auth(&tokens.access_token)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let fresh = self.session.refreshed(&tokens).await?;
        let response = build(&self.http)
            .bearer_auth(&fresh.access_token)
            .send()
            .await?;

        Ok(response)
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api { status, body })
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let response = expect_success(response).await?;
    Ok(response.json().await?)
}
