//! Payment gateway client
//!
//! Thin typed client over the gateway's JSON API: one call to open a
//! payment session and one to verify a returning payment. Code 100 means
//! accepted; verification additionally treats 101 (already verified) as
//! success so a replayed return leg converges instead of failing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

const CODE_ACCEPTED: i64 = 100;
const CODE_ALREADY_VERIFIED: i64 = 101;

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gateway rejected the session: {0}")]
    SessionRejected(String),

    #[error("Gateway declined verification with code {0}")]
    VerificationDeclined(i64),

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),
}

/// Metadata forwarded with a session request, echoed back in gateway
/// dashboards for reconciliation.
#[derive(Debug, Serialize)]
pub struct SessionMetadata {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub payment_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    merchant_id: &'a str,
    amount: i64,
    callback_url: &'a str,
    description: &'a str,
    metadata: &'a SessionMetadata,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    data: Option<SessionData>,
    #[serde(default)]
    errors: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    code: i64,
    authority: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    merchant_id: &'a str,
    amount: i64,
    authority: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    code: i64,
    ref_id: Option<i64>,
    card_pan: Option<String>,
}

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub ref_id: String,
    pub card_pan: Option<String>,
}

/// Typed client for the payment gateway
pub struct GatewayClient {
    http: reqwest::Client,
    merchant_id: String,
    request_url: String,
    verify_url: String,
    start_pay_url: String,
    callback_url: String,
}

impl GatewayClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            merchant_id: config.gateway_merchant_id.clone(),
            request_url: config.gateway_request_url.clone(),
            verify_url: config.gateway_verify_url.clone(),
            start_pay_url: config.gateway_start_pay_url.clone(),
            callback_url: config.gateway_callback_url.clone(),
        })
    }

    /// Open a payment session. Returns the gateway authority token.
    pub async fn request_session(
        &self,
        amount: i64,
        description: &str,
        metadata: &SessionMetadata,
    ) -> Result<String, GatewayError> {
        let body = SessionRequest {
            merchant_id: &self.merchant_id,
            amount,
            callback_url: &self.callback_url,
            description,
            metadata,
        };

        let response: SessionResponse = self
            .http
            .post(&self.request_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let data = response.data.ok_or_else(|| {
            GatewayError::SessionRejected(response.errors.to_string())
        })?;

        if data.code != CODE_ACCEPTED {
            return Err(GatewayError::SessionRejected(format!(
                "code {}: {}",
                data.code, response.errors
            )));
        }

        data.authority.ok_or_else(|| {
            GatewayError::MalformedResponse("accepted session without authority".to_string())
        })
    }

    /// Verify a returning payment against the amount we expect to collect.
    pub async fn verify(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<VerifiedPayment, GatewayError> {
        let body = VerifyRequest {
            merchant_id: &self.merchant_id,
            amount,
            authority,
        };

        let response: VerifyResponse = self
            .http
            .post(&self.verify_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let data = response
            .data
            .ok_or_else(|| GatewayError::MalformedResponse("verify without data".to_string()))?;

        if data.code != CODE_ACCEPTED && data.code != CODE_ALREADY_VERIFIED {
            return Err(GatewayError::VerificationDeclined(data.code));
        }

        let ref_id = data.ref_id.ok_or_else(|| {
            GatewayError::MalformedResponse("verified payment without ref_id".to_string())
        })?;

        Ok(VerifiedPayment {
            ref_id: ref_id.to_string(),
            card_pan: data.card_pan,
        })
    }

    /// Redirect URL the payer is sent to for a given authority.
    pub fn start_pay_url(&self, authority: &str) -> String {
        format!("{}{}", self.start_pay_url, authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_parsing() {
        let raw = r#"{"data":{"code":100,"authority":"A000000123"},"errors":[]}"#;
        let parsed: SessionResponse = serde_json::from_str(raw).unwrap();
        let data = parsed.data.unwrap();
        assert_eq!(data.code, 100);
        assert_eq!(data.authority.as_deref(), Some("A000000123"));
    }

    #[test]
    fn test_session_response_error_shape() {
        let raw = r#"{"data":null,"errors":{"code":-9,"message":"validation error"}}"#;
        let parsed: SessionResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.data.is_none());
        assert!(parsed.errors.to_string().contains("-9"));
    }

    #[test]
    fn test_verify_response_parsing() {
        let raw = r#"{"data":{"code":100,"ref_id":201012345678,"card_pan":"502229******1234"}}"#;
        let parsed: VerifyResponse = serde_json::from_str(raw).unwrap();
        let data = parsed.data.unwrap();
        assert_eq!(data.code, 100);
        assert_eq!(data.ref_id, Some(201012345678));
    }
}
