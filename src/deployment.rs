use crate::events::{decimalsCall, symbolCall};
use crate::rpc::RpcClient;
use crate::scanner::ChainInfo;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, Bytes};
use anyhow::Result;
use std::future::Future;
use tracing::{debug, info, warn};

/// Anything that can report a contract's bytecode at a given block.
pub trait CodeReader {
    fn code_at(&self, address: Address, block_number: u64) -> impl Future<Output = Result<Bytes>>;
}

impl CodeReader for RpcClient {
    async fn code_at(&self, address: Address, block_number: u64) -> Result<Bytes> {
        self.get_code_at_block(address, block_number).await
    }
}

/// Binary search for the first block at which `address` has code.
pub async fn find_deployment_block<R: CodeReader>(
    client: &R,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.code_at(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let mut left = 0u64;
    let mut right = latest_block;

    while left < right {
        let mid = left + (right - left) / 2;

        let code = client.code_at(address, mid).await?;

        if code.is_empty() {
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    info!("Contract {:?} deployed at block {}", address, left);
    Ok(left)
}

/// Runs an optional ERC20 view call. Plenty of tokens predate the metadata
/// extension, so a failure only logs and yields `None`.
async fn read_optional<C: SolCall>(client: &RpcClient, token: Address, call: C) -> Option<C::Return>
where
    C::Return: std::fmt::Debug,
{
    match client.call_contract(token, call).await {
        Ok(value) => {
            debug!("{} of {:?} = {:?}", C::SIGNATURE, token, value);
            Some(value)
        }
        Err(e) => {
            warn!("Failed to call {} on {:?}: {}", C::SIGNATURE, token, e);
            None
        }
    }
}

impl ChainInfo for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_latest_block().await
    }

    async fn deployment_block(&self, token: Address, latest_block: u64) -> Result<u64> {
        find_deployment_block(self, token, latest_block).await
    }

    async fn token_symbol(&self, token: Address) -> Option<String> {
        read_optional(self, token, symbolCall {}).await
    }

    async fn token_decimals(&self, token: Address) -> Option<u8> {
        read_optional(self, token, decimalsCall {}).await
    }
}
