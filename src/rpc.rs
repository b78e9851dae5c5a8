//! Ordered-fallback pool of JSON-RPC endpoints for a single chain.

use std::{sync::Arc, time::Duration};

use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::client::RpcClient,
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{EndpointError, SyncError};

/// Default timeout of a single call against a single endpoint.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, derive_more::Debug)]
pub struct Endpoint {
    label: String,
    #[debug(skip)]
    provider: DynProvider,
}

impl Endpoint {
    /// Wraps an already connected provider, `label` is used for logging only.
    pub fn new(label: impl Into<String>, provider: DynProvider) -> Self {
        Self {
            label: label.into(),
            provider,
        }
    }

    /// Connects to the given URL over HTTP.
    ///
    /// Label keeps the host only, so credentials embedded in the URL path or
    /// query never reach the logs.
    pub fn http(url: &Url) -> Self {
        let provider =
            DynProvider::new(ProviderBuilder::new().connect_client(RpcClient::new_http(url.clone())));
        Self::new(url.host_str().unwrap_or("unknown-host"), provider)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Set of endpoints of a chain tried strictly in order.
///
/// Every call makes at most one attempt per endpoint, the first well-formed
/// response wins. Trying the next endpoint substitutes per-endpoint retries.
#[derive(Clone, Debug)]
pub struct RpcPool {
    chain_id: u64,
    endpoints: Arc<[Endpoint]>,
    call_timeout: Duration,
}

impl RpcPool {
    pub fn new(chain_id: u64, endpoints: Vec<Endpoint>, call_timeout: Duration) -> Self {
        Self {
            chain_id,
            endpoints: endpoints.into(),
            call_timeout,
        }
    }

    /// Creates the pool from endpoint URLs in fallback order.
    pub fn connect(chain_id: u64, urls: &[Url], call_timeout: Duration) -> Self {
        Self::new(chain_id, urls.iter().map(Endpoint::http).collect(), call_timeout)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Runs `op` against endpoints in order until one succeeds.
    ///
    /// # Returns
    ///
    /// On failure, [`SyncError::ChainRead`] if an endpoint produced a
    /// definitive revert, or [`SyncError::ChainUnavailable`] with the last
    /// endpoint error once all endpoints failed.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, SyncError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T, EndpointError>>,
    {
        let mut last_error = None;
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            let result = tokio::time::timeout(self.call_timeout, op(endpoint.provider.clone()))
                .await
                .unwrap_or_else(|_| Err(EndpointError::Timeout(self.call_timeout)));
            match result {
                Ok(value) => {
                    if idx > 0 {
                        debug!(
                            chain_id = self.chain_id,
                            endpoint = endpoint.label(),
                            attempt = idx + 1,
                            "RPC call served by fallback endpoint"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_endpoint_fault() => {
                    return Err(SyncError::ChainRead {
                        chain_id: self.chain_id,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        chain_id = self.chain_id,
                        endpoint = endpoint.label(),
                        %err,
                        "RPC endpoint failed"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(SyncError::ChainUnavailable {
            chain_id: self.chain_id,
            attempts: self.endpoints.len(),
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no endpoints configured".to_string()),
        })
    }

    /// Latest block number of the chain.
    pub async fn block_number(&self) -> Result<u64, SyncError> {
        self.call(|provider| async move {
            provider.get_block_number().await.map_err(EndpointError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use alloy::transports::mock::Asserter;

    use super::*;

    fn mocked(label: &str, asserter: Asserter) -> Endpoint {
        Endpoint::new(
            label,
            DynProvider::new(ProviderBuilder::new().connect_mocked_client(asserter)),
        )
    }

    #[tokio::test]
    async fn test_falls_back_to_next_endpoint() {
        let bad = Asserter::new();
        bad.push_failure_msg("upstream connect error");
        let good = Asserter::new();
        good.push_success(&"0x69");

        let pool = RpcPool::new(
            1,
            vec![mocked("bad", bad), mocked("good", good)],
            DEFAULT_CALL_TIMEOUT,
        );
        assert_eq!(pool.block_number().await.unwrap(), 0x69);
    }

    #[tokio::test]
    async fn test_unreachable_url_falls_back() {
        let good = Asserter::new();
        good.push_success(&"0x2a");

        let unreachable = Url::parse("http://127.0.0.1:1").unwrap();
        let pool = RpcPool::new(
            1,
            vec![Endpoint::http(&unreachable), mocked("good", good)],
            Duration::from_secs(2),
        );
        assert_eq!(pool.block_number().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_all_endpoints_failed() {
        let first = Asserter::new();
        first.push_failure_msg("rate limited");
        let second = Asserter::new();
        second.push_failure_msg("bad gateway");

        let pool = RpcPool::new(
            7,
            vec![mocked("first", first), mocked("second", second)],
            DEFAULT_CALL_TIMEOUT,
        );
        match pool.block_number().await {
            Err(SyncError::ChainUnavailable {
                chain_id,
                attempts,
                last,
            }) => {
                assert_eq!(chain_id, 7);
                assert_eq!(attempts, 2);
                assert!(last.contains("bad gateway"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_endpoint_failure() {
        let pool = RpcPool::new(
            1,
            vec![mocked("slow", Asserter::new())],
            Duration::from_millis(50),
        );
        let result = pool
            .call(|_provider| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, EndpointError>(0u64)
            })
            .await;
        match result {
            Err(SyncError::ChainUnavailable { last, .. }) => assert!(last.contains("timed out")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_revert_stops_fallback() {
        let pool = RpcPool::new(
            1,
            vec![mocked("first", Asserter::new()), mocked("second", Asserter::new())],
            DEFAULT_CALL_TIMEOUT,
        );
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let result = pool
            .call(|_provider| {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err::<u64, _>(EndpointError::Reverted("vault paused".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::ChainRead { .. })));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_pool_is_unavailable() {
        let pool = RpcPool::new(3, vec![], DEFAULT_CALL_TIMEOUT);
        assert!(matches!(
            pool.block_number().await,
            Err(SyncError::ChainUnavailable { attempts: 0, .. })
        ));
    }
}
