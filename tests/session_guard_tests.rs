//! Session guard single-flight property tests

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use portico_server::client::{SessionError, SessionGuard, TokenPair, TokenRefresher};

    struct SlowRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for SlowRefresher {
        async fn refresh(&self, refresh_token: &str) -> anyhow::Result<TokenPair> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(TokenPair {
                access_token: "rotated-access".to_string(),
                refresh_token: refresh_token.to_string(),
            })
        }
    }

    fn initial_pair() -> TokenPair {
        TokenPair {
            access_token: "stale-access".to_string(),
            refresh_token: "refresh-0".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_staggered_expiries_share_one_refresh() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let guard = Arc::new(SessionGuard::new(initial_pair(), refresher.clone()));

        let observed = guard.current().await;

        // A burst of callers observing the expired token at once, plus a
        // wave arriving while the leader's refresh is still in flight.
        let mut handles = Vec::new();
        for i in 0..32 {
            let guard = guard.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(async move {
                if i >= 16 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                guard.refreshed(&observed).await
            }));
        }

        for handle in handles {
            let tokens = handle.await.unwrap().unwrap();
            assert_eq!(tokens.access_token, "rotated-access");
        }

        assert_eq!(
            refresher.calls.load(Ordering::SeqCst),
            1,
            "all concurrent callers must share a single refresh"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_late_caller_with_stale_pair_skips_refresh() {
        let refresher = Arc::new(SlowRefresher {
            calls: AtomicUsize::new(0),
        });
        let guard = Arc::new(SessionGuard::new(initial_pair(), refresher.clone()));

        let observed = guard.current().await;
        guard.refreshed(&observed).await.unwrap();

        // A request that started before the refresh finished still holds the
        // stale pair; it must be handed the fresh one, not start a refresh.
        let tokens = guard.refreshed(&observed).await.unwrap();
        assert_eq!(tokens.access_token, "rotated-access");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    struct HangingRefresher;

    #[async_trait]
    impl TokenRefresher for HangingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> anyhow::Result<TokenPair> {
            std::future::pending().await
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hung_refresh_releases_all_callers() {
        let guard = Arc::new(SessionGuard::with_timeout(
            initial_pair(),
            Arc::new(HangingRefresher),
            Duration::from_millis(30),
        ));

        let observed = guard.current().await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let guard = guard.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(
                async move { guard.refreshed(&observed).await },
            ));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err(), SessionError::Timeout);
        }
    }
}
