use crate::config::BlockRange;
use crate::events::{RawLog, Transfer};
use crate::scanner::LogSource;
use alloy::network::TransactionBuilder;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log, TransactionRequest};
use alloy::sol_types::{SolCall, SolEvent};
use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request

/// Client for one or more JSON-RPC endpoints. Failing endpoints are rotated
/// out; clones share the rotation cursor.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], max_retries: usize) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, method: &str, error: &str) {
        warn!(
            "{} failed on {}: {}, rotating provider",
            method,
            self.get_current_url(),
            error
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self, method: &str) -> anyhow::Error {
        warn!(
            "{} timed out after {} seconds on {}, rotating provider",
            method,
            REQUEST_TIMEOUT.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "{} timed out after {} seconds",
            method,
            REQUEST_TIMEOUT.as_secs()
        )
    }

    /// Sends one request through the current provider with the timeout,
    /// rotation and backoff policy. Errors for which `retryable` is false are
    /// returned at once without rotating.
    async fn request<T, E, F, Fut, P>(&self, method: &'static str, send: F, retryable: P) -> Result<T>
    where
        F: Fn(AlloyFullProvider) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&str) -> bool,
    {
        let retryable = &retryable;
        let attempt = || {
            let pending = send(self.get_provider().clone());
            async move {
                match timeout(REQUEST_TIMEOUT, pending).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        if retryable(&message) {
                            self.handle_error(method, &message);
                        }
                        Err(anyhow::anyhow!("{}", message))
                    }
                    Err(_) => Err(self.handle_timeout(method)),
                }
            }
        };

        RetryIf::spawn(self.get_retry_strategy(), attempt, |e: &anyhow::Error| {
            retryable(&e.to_string())
        })
        .await
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        self.request(
            "eth_blockNumber",
            |provider| async move { provider.get_block_number().await },
            always,
        )
        .await
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        self.request(
            "eth_getCode",
            |provider| async move {
                provider
                    .get_code_at(address)
                    .block_id(BlockNumberOrTag::Number(block_number).into())
                    .await
            },
            always,
        )
        .await
    }

    /// Read-only `eth_call` against the latest state.
    pub async fn call_contract<C>(&self, address: Address, call: C) -> Result<C::Return>
    where
        C: SolCall,
    {
        let input: Bytes = call.abi_encode().into();
        let output = self
            .request(
                "eth_call",
                |provider| {
                    let request = TransactionRequest::default()
                        .with_to(address)
                        .with_input(input.clone());
                    async move { provider.call(request).await }
                },
                always,
            )
            .await?;

        C::abi_decode_returns(&output)
            .map_err(|e| anyhow::anyhow!("Failed to decode {} output: {}", C::SIGNATURE, e))
    }

    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(contract_address)
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        // A result cap is answered by splitting the range, not by retrying.
        self.request(
            "eth_getLogs",
            |provider| {
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await }
            },
            |message| !is_max_results(message),
        )
        .await
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// Fetches every log of `topic0` emitted by `contract_address` in the
    /// inclusive range, following the provider's range hints when it caps
    /// the result size.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_internal(current_from, to_block, contract_address, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let error_str = e.to_string();
                    if !is_max_results(&error_str) {
                        return Err(e);
                    }

                    let Some((suggested_from, suggested_to)) =
                        Self::parse_max_results_error(&error_str)
                    else {
                        return Err(e);
                    };

                    if suggested_from != current_from || suggested_to < suggested_from {
                        return Err(anyhow::anyhow!(
                            "Provider suggested unusable range {}-{} for blocks {}-{}",
                            suggested_from,
                            suggested_to,
                            current_from,
                            to_block
                        ));
                    }

                    let suggested_to = suggested_to.min(to_block);
                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, suggested_to
                    );

                    let logs = self
                        .get_logs_internal(suggested_from, suggested_to, contract_address, topic0)
                        .await?;

                    all_logs.extend(logs);
                    current_from = suggested_to + 1;
                }
            }
        }

        Ok(all_logs)
    }
}

fn always(_: &str) -> bool {
    true
}

fn is_max_results(message: &str) -> bool {
    message.contains("exceeds max results")
}

impl LogSource for RpcClient {
    async fn fetch_logs(&self, token: Address, range: BlockRange) -> Result<Vec<RawLog>> {
        let logs = self
            .get_logs(range.from, range.to, token, Transfer::SIGNATURE_HASH)
            .await?;
        Ok(logs.into_iter().map(RawLog::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_range_hint() {
        let message = "query exceeds max results 10000, retry with the range 17081000-17081150";
        assert_eq!(
            RpcClient::parse_max_results_error(message),
            Some((17081000, 17081150))
        );
        assert_eq!(RpcClient::parse_max_results_error("rate limited"), None);
        assert!(is_max_results(message));
        assert!(!is_max_results("block range is too wide"));
    }

    #[test]
    fn rejects_empty_or_invalid_urls() {
        assert!(RpcClient::new(&[], 5).is_err());
        assert!(RpcClient::new(&["not a url".to_string()], 5).is_err());
    }

    #[test]
    fn rotation_wraps_around() {
        let urls = vec![
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ];
        let client = RpcClient::new(&urls, 0).unwrap();
        assert_eq!(client.get_current_url(), "http://localhost:8545");

        let shared = client.clone();
        shared.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8546");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8545");
    }
}
