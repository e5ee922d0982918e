//! Chain client contract consumed by the crawlers

pub mod rpc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use crate::blockchain::Blockchain;
use crate::error::Result;

/// A mined log with the positional fields the crawlers need.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub gas_price: u128,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawReceipt {
    pub status: bool,
    pub gas_used: u64,
    pub logs: Vec<RawLog>,
}

/// Log range query. An empty address list matches every emitter; no topic0
/// matches every signature (anonymous events).
#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn matches(&self, log: &RawLog) -> bool {
        if log.block_number < self.from_block || log.block_number > self.to_block {
            return false;
        }
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        match self.topic0 {
            Some(topic0) => log.topics.first() == Some(&topic0),
            None => true,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Network this client is connected to
    fn blockchain(&self) -> Blockchain;

    async fn get_latest_block_number(&self) -> Result<u64>;

    /// Logs in `[from_block, to_block]`, in ascending chain order
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64>;

    async fn get_transaction(&self, hash: B256) -> Result<RawTransaction>;

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RawReceipt>;
}
