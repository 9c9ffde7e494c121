//! Portal API client
//!
//! A `reqwest`-based consumer of the portal endpoints. Every authenticated
//! call goes through the session guard, which serializes token refreshes:
//! when many in-flight requests observe an expired token at once, exactly
//! one refresh runs and all callers retry once with its result.

pub mod portal;
pub mod session;

pub use portal::{ClientError, PortalClient};
pub use session::{SessionError, SessionGuard, TokenPair, TokenRefresher};
