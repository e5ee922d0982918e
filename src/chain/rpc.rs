use std::future::IntoFuture;
use std::str::FromStr;
use std::time::Duration;

use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{ReceiptResponse, TransactionResponse};
use alloy::primitives::B256;
use alloy::providers::fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log as RpcLog, Transaction as RpcTransaction};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::blockchain::Blockchain;
use crate::chain::{ChainClient, LogFilter, RawLog, RawReceipt, RawTransaction};
use crate::error::{CrawlerError, Result};

type RPCProvider = FillProvider<JoinFill<Identity, JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>>, RootProvider>;

/// Chain client over an HTTP JSON-RPC endpoint. Every call is bounded by
/// `timeout`; a call that runs past it is dropped and surfaces as
/// `CrawlerError::Timeout`.
pub struct RpcChainClient {
    blockchain: Blockchain,
    provider: RPCProvider,
    timeout: Duration,
}

impl RpcChainClient {
    pub fn new(blockchain: Blockchain, http_rpc_url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::from_str(http_rpc_url)
            .map_err(|e| CrawlerError::Config(format!("Invalid RPC URL for {}: {}", blockchain, e)))?;
        let provider = ProviderBuilder::new().connect_http(url);
        info!("Connecting to {} RPC endpoint: {}", blockchain, http_rpc_url);

        Ok(Self {
            blockchain,
            provider,
            timeout,
        })
    }

    async fn call<T, F>(&self, operation: &str, request: F) -> Result<T>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| CrawlerError::Chain(format!("{} on {}: {}", operation, self.blockchain, e))),
            Err(_) => Err(CrawlerError::Timeout {
                operation: format!("{} on {}", operation, self.blockchain),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn raw_log(log: &RpcLog) -> Result<RawLog> {
    let block_number = log
        .block_number
        .ok_or_else(|| CrawlerError::Chain("Missing block number in a log".to_string()))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or_else(|| CrawlerError::Chain("Missing transaction hash in a log".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| CrawlerError::Chain("Missing log index in a log".to_string()))?;

    Ok(RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number,
        transaction_hash,
        log_index,
    })
}

fn raw_transaction(tx: &RpcTransaction) -> Result<RawTransaction> {
    let hash = TransactionResponse::tx_hash(tx);
    let block_number = tx
        .block_number
        .ok_or_else(|| CrawlerError::Chain(format!("Transaction {:#x} is not mined yet", hash)))?;

    let dynamic_fee = ConsensusTransaction::is_dynamic_fee(tx);
    let gas_price = tx
        .effective_gas_price
        .or_else(|| ConsensusTransaction::gas_price(tx))
        .unwrap_or_else(|| ConsensusTransaction::max_fee_per_gas(tx));

    Ok(RawTransaction {
        hash,
        block_number,
        from: TransactionResponse::from(tx),
        to: ConsensusTransaction::to(tx),
        input: ConsensusTransaction::input(tx).clone(),
        gas_price,
        max_fee_per_gas: dynamic_fee.then(|| ConsensusTransaction::max_fee_per_gas(tx)),
        max_priority_fee_per_gas: if dynamic_fee {
            ConsensusTransaction::max_priority_fee_per_gas(tx)
        } else {
            None
        },
    })
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        self.call("eth_blockNumber", self.provider.get_block_number()).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let mut rpc_filter = Filter::new()
            .from_block(filter.from_block)
            .to_block(filter.to_block);
        if !filter.addresses.is_empty() {
            rpc_filter = rpc_filter.address(filter.addresses.clone());
        }
        if let Some(topic0) = filter.topic0 {
            rpc_filter = rpc_filter.event_signature(topic0);
        }

        let logs = self.call("eth_getLogs", self.provider.get_logs(&rpc_filter)).await?;
        debug!(
            "Received {} logs for blocks {}-{} on {}",
            logs.len(),
            filter.from_block,
            filter.to_block,
            self.blockchain
        );

        logs.iter().map(raw_log).collect()
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = self
            .call(
                "eth_getBlockByNumber",
                self.provider.get_block_by_number(BlockNumberOrTag::Number(block_number)),
            )
            .await?
            .ok_or_else(|| CrawlerError::Chain(format!("Block {} not found on {}", block_number, self.blockchain)))?;

        Ok(block.header.timestamp)
    }

    async fn get_transaction(&self, hash: B256) -> Result<RawTransaction> {
        let tx = self
            .call("eth_getTransactionByHash", self.provider.get_transaction_by_hash(hash))
            .await?
            .ok_or_else(|| CrawlerError::Chain(format!("Transaction {:#x} not found on {}", hash, self.blockchain)))?;

        raw_transaction(&tx)
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RawReceipt> {
        let receipt = self
            .call("eth_getTransactionReceipt", self.provider.get_transaction_receipt(hash))
            .await?
            .ok_or_else(|| CrawlerError::Chain(format!("Receipt for {:#x} not found on {}", hash, self.blockchain)))?;

        let logs = receipt.inner.logs().iter().map(raw_log).collect::<Result<Vec<_>>>()?;

        Ok(RawReceipt {
            status: receipt.status(),
            gas_used: receipt.gas_used,
            logs,
        })
    }
}
