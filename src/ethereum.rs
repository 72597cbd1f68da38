use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers_core::types::{Address, BlockId, BlockNumber, Filter, Log, H256, U64};
use ethers_core::utils::keccak256;
use ethers_providers::{Http, Middleware, Provider, ProviderError};
use log::debug;
use tokio::time::timeout;

use crate::error::FetchError;

pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

/// topic0 of every ERC-20 `Transfer` log.
pub fn transfer_topic() -> H256 {
    H256::from(keccak256(TRANSFER_EVENT))
}

/// The slice of the chain node the monitor needs.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, FetchError>;

    /// `Transfer` logs of the monitored contract in `[from_block, to_block]`.
    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, FetchError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, FetchError>;

    /// Fails fatally when there is no contract code at the monitored address.
    async fn verify_contract(&self) -> Result<(), FetchError>;
}

pub struct EthereumClient {
    provider: Arc<Provider<Http>>,
    token_address: Address,
    request_timeout: Duration,
}

impl EthereumClient {
    pub fn new(
        rpc_url: &str,
        token_address: Address,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| FetchError::Fatal(format!("invalid RPC url {rpc_url:?}: {e}")))?;

        Ok(Self {
            provider: Arc::new(provider),
            token_address,
            request_timeout,
        })
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FetchError::Transient(format!("{what}: {e}"))),
            Err(_) => Err(FetchError::Transient(format!(
                "{what}: timed out after {:?}",
                self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl ChainSource for EthereumClient {
    async fn latest_block_number(&self) -> Result<u64, FetchError> {
        let block_number = self
            .call("eth_blockNumber", self.provider.get_block_number())
            .await?;
        Ok(block_number.as_u64())
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, FetchError> {
        let filter = Filter::new()
            .address(self.token_address)
            .topic0(transfer_topic())
            .from_block(BlockNumber::Number(U64::from(from_block)))
            .to_block(BlockNumber::Number(U64::from(to_block)));

        let logs = self.call("eth_getLogs", self.provider.get_logs(&filter)).await?;
        debug!("eth_getLogs {}..={} returned {} logs", from_block, to_block, logs.len());
        Ok(logs)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, FetchError> {
        let block = self
            .call(
                "eth_getBlockByNumber",
                self.provider
                    .get_block(BlockId::Number(BlockNumber::Number(U64::from(block_number)))),
            )
            .await?
            .ok_or_else(|| FetchError::Transient(format!("block {block_number} not found")))?;

        DateTime::from_timestamp(block.timestamp.as_u64() as i64, 0)
            .ok_or_else(|| FetchError::Transient(format!("invalid timestamp in block {block_number}")))
    }

    async fn verify_contract(&self) -> Result<(), FetchError> {
        let code = self
            .call("eth_getCode", self.provider.get_code(self.token_address, None))
            .await?;
        if code.is_empty() {
            return Err(FetchError::Fatal(format!(
                "no contract code at {:?}",
                self.token_address
            )));
        }
        Ok(())
    }
}
