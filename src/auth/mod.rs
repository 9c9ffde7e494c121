//! Authentication module for Portico
//!
//! User identity lives outside this service; what remains here is the
//! bearer-token surface the portal endpoints depend on:
//! - JWT access/refresh token generation and validation
//! - Stateless refresh rotation for the client-side session guard

mod jwt;
mod service;

pub use jwt::{
    generate_access_token, generate_refresh_token, get_user_id_from_claims, verify_token, Claims,
    JwtError, TokenType,
};
pub use service::{AuthError, AuthService, AuthTokensResponse, RefreshTokenRequest};
