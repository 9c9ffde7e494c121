//! Session guard - single-flight access-token refresh
//!
//! Many requests can observe an expired token in the same instant. The
//! first caller through the guard becomes the leader and runs the one
//! refresh; everyone arriving while it is outstanding becomes a follower
//! and awaits the broadcast result. A refresh that does not resolve within
//! the configured interval fails closed: followers are released with an
//! error instead of hanging.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Access/refresh credential pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session errors surfaced to callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session expired; re-authentication required")]
    Expired,

    #[error("Token refresh timed out")]
    Timeout,
}

/// The operation that exchanges a refresh token for a new pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair>;
}

type RefreshResult = Result<Arc<TokenPair>, SessionError>;

struct GuardInner {
    tokens: Arc<TokenPair>,
    /// Present while a refresh is outstanding; followers await it.
    in_flight: Option<watch::Receiver<Option<RefreshResult>>>,
}

enum Role {
    Leader(watch::Sender<Option<RefreshResult>>),
    Follower(watch::Receiver<Option<RefreshResult>>),
}

/// Single-flight refresh guard for one credential pair
pub struct SessionGuard {
    refresher: Arc<dyn TokenRefresher>,
    refresh_timeout: Duration,
    inner: Mutex<GuardInner>,
}

impl SessionGuard {
    pub fn new(initial: TokenPair, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_timeout(initial, refresher, DEFAULT_REFRESH_TIMEOUT)
    }

    pub fn with_timeout(
        initial: TokenPair,
        refresher: Arc<dyn TokenRefresher>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            refresher,
            refresh_timeout,
            inner: Mutex::new(GuardInner {
                tokens: Arc::new(initial),
                in_flight: None,
            }),
        }
    }

    /// The credentials to attach to the next request.
    pub async fn current(&self) -> Arc<TokenPair> {
        self.inner.lock().await.tokens.clone()
    }

    /// Called after a request using `observed` was rejected as expired.
    ///
    /// Returns the refreshed credentials to retry with, exactly once per
    /// caller. If another caller already replaced `observed`, its result is
    /// returned without starting a second refresh.
    pub async fn refreshed(&self, observed: &Arc<TokenPair>) -> RefreshResult {
        let role = {
            let mut inner = self.inner.lock().await;

            // A refresh completed since this caller read its tokens.
            if !Arc::ptr_eq(&inner.tokens, observed) {
                return Ok(inner.tokens.clone());
            }

            match &inner.in_flight {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inner.in_flight = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => self.lead_refresh(tx).await,
            Role::Follower(rx) => follow_refresh(rx).await,
        }
    }

    async fn lead_refresh(&self, tx: watch::Sender<Option<RefreshResult>>) -> RefreshResult {
        let refresh_token = {
            let inner = self.inner.lock().await;
            inner.tokens.refresh_token.clone()
        };

        let attempt = tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(&refresh_token),
        )
        .await;

        let result: RefreshResult = match attempt {
            Ok(Ok(pair)) => Ok(Arc::new(pair)),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "Token refresh failed");
                Err(SessionError::Expired)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "Token refresh timed out, failing closed"
                );
                Err(SessionError::Timeout)
            }
        };

        {
            let mut inner = self.inner.lock().await;
            if let Ok(tokens) = &result {
                inner.tokens = tokens.clone();
            }
            inner.in_flight = None;
        }

        // Release followers. Send only fails when none are waiting.
        let _ = tx.send(Some(result.clone()));

        result
    }
}

async fn follow_refresh(mut rx: watch::Receiver<Option<RefreshResult>>) -> RefreshResult {
    loop {
        if let Some(result) = rx.borrow().clone() {
            return result;
        }
        if rx.changed().await.is_err() {
            // Leader dropped without broadcasting.
            return Err(SessionError::Expired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                anyhow::bail!("refresh rejected");
            }
            Ok(TokenPair {
                access_token: format!("access-{}", call + 1),
                refresh_token: refresh_token.to_string(),
            })
        }
    }

    fn initial_pair() -> TokenPair {
        TokenPair {
            access_token: "access-0".to_string(),
            refresh_token: "refresh-0".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_flight_under_concurrency() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_millis(50), false));
        let guard = Arc::new(SessionGuard::new(initial_pair(), refresher.clone()));

        let observed = guard.current().await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(
                async move { guard.refreshed(&observed).await },
            ));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        // Exactly one refresh ran; every caller got its result.
        assert_eq!(refresher.calls(), 1);
        for token in &tokens {
            assert_eq!(token.access_token, "access-1");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_broadcast_to_all_followers() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_millis(50), true));
        let guard = Arc::new(SessionGuard::new(initial_pair(), refresher.clone()));

        let observed = guard.current().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(
                async move { guard.refreshed(&observed).await },
            ));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err(), SessionError::Expired);
        }

        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_timeout_fails_closed() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_secs(60), false));
        let guard = SessionGuard::with_timeout(
            initial_pair(),
            refresher.clone(),
            Duration::from_millis(20),
        );

        let observed = guard.current().await;
        let result = guard.refreshed(&observed).await;
        assert_eq!(result.unwrap_err(), SessionError::Timeout);

        // The credentials were not replaced by the failed attempt.
        assert!(Arc::ptr_eq(&guard.current().await, &observed));
    }

    #[tokio::test]
    async fn test_stale_observation_skips_refresh() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_millis(1), false));
        let guard = SessionGuard::new(initial_pair(), refresher.clone());

        let observed = guard.current().await;
        let refreshed = guard.refreshed(&observed).await.unwrap();
        assert_eq!(refresher.calls(), 1);

        // A caller still holding the original pair is handed the fresh one
        // without a second refresh.
        let result = guard.refreshed(&observed).await.unwrap();
        assert_eq!(result.access_token, refreshed.access_token);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_cycle_after_failure() {
        let refresher = Arc::new(CountingRefresher::new(Duration::from_millis(1), true));
        let guard = SessionGuard::new(initial_pair(), refresher.clone());

        let observed = guard.current().await;
        assert!(guard.refreshed(&observed).await.is_err());

        // The failed cycle finished; a later expiry starts a fresh one.
        assert!(guard.refreshed(&observed).await.is_err());
        assert_eq!(refresher.calls(), 2);
    }
}
