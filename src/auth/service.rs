//! Authentication service
//!
//! Stateless bearer-token issuance and refresh rotation. Login and user
//! management live in the identity service; this side only mints and
//! rotates token pairs for users it is handed.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::jwt::{
    generate_access_token, generate_refresh_token, get_user_id_from_claims, verify_token,
    JwtError, TokenType,
};

/// Auth service errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Token error: {0}")]
    TokenError(String),
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::TokenError(e.to_string())
    }
}

/// Auth tokens response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_days: i64,
}

impl AuthService {
    pub fn new(
        jwt_secret: String,
        access_token_ttl_seconds: i64,
        refresh_token_ttl_days: i64,
    ) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_days,
        }
    }

    /// Issue a fresh access/refresh pair for a user.
    pub fn issue_tokens(&self, user_id: Uuid) -> Result<AuthTokensResponse, AuthError> {
        let jti = Uuid::new_v4().to_string();

        let access_token = generate_access_token(
            user_id,
            &jti,
            &self.jwt_secret,
            self.access_token_ttl_seconds,
        )?;
        let refresh_token = generate_refresh_token(
            user_id,
            &jti,
            &self.jwt_secret,
            self.refresh_token_ttl_days,
        )?;

        Ok(AuthTokensResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds,
        })
    }

    /// Rotate a token pair from a valid refresh token.
    pub fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthTokensResponse, AuthError> {
        let claims = verify_token(refresh_token, &self.jwt_secret)
            .map_err(|_| AuthError::InvalidRefreshToken)?;

        if claims.token_type != TokenType::Refresh.as_str() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let user_id =
            get_user_id_from_claims(&claims).map_err(|_| AuthError::InvalidRefreshToken)?;

        tracing::debug!(user_id = %user_id, "Refresh token rotated");

        self.issue_tokens(user_id)
    }

    /// Signing secret, for the bearer extractor.
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> AuthService {
        AuthService::new("test-secret".to_string(), 900, 7)
    }

    #[test]
    fn test_issue_and_refresh_pair() {
        let service = test_service();
        let user_id = Uuid::new_v4();

        let pair = service.issue_tokens(user_id).unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        let rotated = service.refresh_tokens(&pair.refresh_token).unwrap();
        let claims = verify_token(&rotated.access_token, "test-secret").unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.token_type, "access");
    }

    #[test]
    fn test_access_token_rejected_for_refresh() {
        let service = test_service();
        let pair = service.issue_tokens(Uuid::new_v4()).unwrap();

        let result = service.refresh_tokens(&pair.access_token);
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
    }

    #[test]
    fn test_garbage_refresh_token_rejected() {
        let service = test_service();
        let result = service.refresh_tokens("not.a.token");
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
    }
}
