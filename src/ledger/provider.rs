//! Ledger client with multi-RPC support and automatic failover

use super::LedgerClient;
use crate::config::LedgerConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Multi-provider ledger client with automatic failover
pub struct EthersLedger {
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Endpoint URLs, parallel to `http_providers`
    urls: Vec<String>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Upper bound for a single RPC round-trip
    request_timeout: Duration,
}

impl EthersLedger {
    /// Create a new ledger client
    pub fn new(config: &LedgerConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();
        let mut urls = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    urls.push(url.clone());
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::Config(
                "No valid RPC providers".to_string(),
            ));
        }

        Ok(Self {
            http_providers,
            urls,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// URL of the active provider
    pub fn active_url(&self) -> &str {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Ledger failover to provider {} ({})", next, self.urls[next]);
    }

    /// Run a read against the active provider, failing over on transport errors
    async fn read_with_failover<T, F, Fut>(&self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::new();

        for _ in 0..self.http_providers.len() {
            match timeout(self.request_timeout, call(self.http().clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("{} failed on {}: {}", operation, self.active_url(), e);
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("{} timed out on {}", operation, self.active_url());
                    last_error = format!("timed out after {:?}", self.request_timeout);
                }
            }
            self.failover();
        }

        Err(RelayerError::Connectivity(format!(
            "{}: all providers failed, last error: {}",
            operation, last_error
        )))
    }

    /// Fee and gas estimates. A node answering with an RPC error is an
    /// estimation failure; transport trouble fails over like other reads.
    async fn estimate<Fut>(&self, operation: &str, call: Fut) -> RelayerResult<U256>
    where
        Fut: Future<Output = Result<U256, ProviderError>>,
    {
        match timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => match node_error_message(&e) {
                Some(message) => Err(RelayerError::FeeEstimation(format!(
                    "{}: {}",
                    operation, message
                ))),
                None => {
                    warn!("{} failed on {}: {}", operation, self.active_url(), e);
                    self.failover();
                    Err(RelayerError::Connectivity(format!("{}: {}", operation, e)))
                }
            },
            Err(_) => {
                warn!("{} timed out on {}", operation, self.active_url());
                self.failover();
                Err(RelayerError::Connectivity(format!(
                    "{} timed out after {:?}",
                    operation, self.request_timeout
                )))
            }
        }
    }
}

/// Message of a JSON-RPC error response, `None` for transport failures
fn node_error_message(error: &ProviderError) -> Option<String> {
    RpcError::as_error_response(error).map(|rpc_error| rpc_error.message.clone())
}

/// Narrow a node-reported quantity; a malformed answer is a node fault
fn to_u64(value: U256, what: &str) -> RelayerResult<u64> {
    u64::try_from(value).map_err(|_| {
        RelayerError::Connectivity(format!("{} {} does not fit in u64", what, value))
    })
}

#[async_trait]
impl LedgerClient for EthersLedger {
    async fn sequence_number(&self, account: Address) -> RelayerResult<u64> {
        // Pending block so transactions still in the mempool are counted
        let count = self
            .read_with_failover("get_transaction_count", |p| async move {
                p.get_transaction_count(account, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;

        to_u64(count, "sequence number")
    }

    async fn fee_price(&self) -> RelayerResult<U256> {
        self.estimate("get_gas_price", self.http().get_gas_price())
            .await
    }

    async fn estimate_resource_limit(&self, tx: &TypedTransaction) -> RelayerResult<U256> {
        self.estimate("estimate_gas", self.http().estimate_gas(tx, None))
            .await
    }

    async fn chain_id(&self) -> RelayerResult<u64> {
        let id = self
            .read_with_failover("get_chainid", |p| async move { p.get_chainid().await })
            .await?;
        to_u64(id, "chain id")
    }

    async fn send_raw(&self, raw: Bytes) -> RelayerResult<H256> {
        // Never resent on another endpoint: the first node may already hold it
        let result = timeout(self.request_timeout, self.http().send_raw_transaction(raw)).await;

        match result {
            Ok(Ok(pending_tx)) => Ok(pending_tx.tx_hash()),
            Ok(Err(e)) => match node_error_message(&e) {
                Some(message) => Err(RelayerError::Rejected(message)),
                None => {
                    let message = e.to_string();
                    self.failover();
                    Err(RelayerError::Connectivity(message))
                }
            },
            Err(_) => {
                self.failover();
                Err(RelayerError::Connectivity(format!(
                    "send_raw_transaction timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
        self.read_with_failover("get_transaction_receipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    fn config(urls: &[&str]) -> LedgerConfig {
        LedgerConfig {
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            chain_id: None,
            request_timeout_secs: 1,
        }
    }

    #[test]
    fn test_rejects_when_no_provider_is_valid() {
        let err = EthersLedger::new(&config(&["not a url"])).err().unwrap();
        assert!(matches!(err, RelayerError::Config(_)));
    }

    #[test]
    fn test_failover_rotates_endpoints() {
        let ledger =
            EthersLedger::new(&config(&["http://127.0.0.1:8545", "http://127.0.0.1:8546"]))
                .unwrap();
        assert_eq!(ledger.active_url(), "http://127.0.0.1:8545");

        ledger.failover();
        assert_eq!(ledger.active_url(), "http://127.0.0.1:8546");

        ledger.failover();
        assert_eq!(ledger.active_url(), "http://127.0.0.1:8545");
    }

    #[test]
    fn test_invalid_urls_are_skipped() {
        let ledger = EthersLedger::new(&config(&["::bad::", "http://127.0.0.1:8545"])).unwrap();
        assert_eq!(ledger.active_url(), "http://127.0.0.1:8545");
        ledger.failover();
        assert_eq!(ledger.active_url(), "http://127.0.0.1:8545");
    }

    #[test]
    fn test_oversized_quantities_are_errors() {
        assert_eq!(to_u64(U256::from(42u64), "chain id").unwrap(), 42);
        assert_eq!(to_u64(U256::from(u64::MAX), "sequence number").unwrap(), u64::MAX);

        let err = to_u64(U256::from(u64::MAX) + 1, "sequence number").unwrap_err();
        assert!(matches!(err, RelayerError::Connectivity(_)));
        assert!(err.to_string().contains("sequence number"));

        let err = to_u64(U256::MAX, "chain id").unwrap_err();
        assert!(matches!(err, RelayerError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_fee_price_transport_failure_fails_over() {
        let ledger = EthersLedger::new(&config(&["http://127.0.0.1:9", "http://127.0.0.1:7"]))
            .unwrap();

        let err = ledger.fee_price().await.unwrap_err();
        assert!(matches!(err, RelayerError::Connectivity(_)));
        assert_eq!(ledger.active_url(), "http://127.0.0.1:7");

        let err = ledger
            .estimate_resource_limit(&TypedTransaction::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::Connectivity(_)));
        assert_eq!(ledger.active_url(), "http://127.0.0.1:9");
    }

    #[test]
    fn test_node_error_responses_are_told_apart_from_transport() {
        let response = ProviderError::JsonRpcClientError(Box::new(
            HttpClientError::JsonRpcError(JsonRpcError {
                code: -32000,
                message: "nonce too low".to_string(),
                data: None,
            }),
        ));
        assert_eq!(
            node_error_message(&response).as_deref(),
            Some("nonce too low")
        );

        let transport = ProviderError::CustomError("connection reset by peer".to_string());
        assert_eq!(node_error_message(&transport), None);
    }
}
