//! Store contract consumed by the crawlers

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::blockchain::Blockchain;
use crate::chain::RawTransaction;
use crate::error::Result;
use crate::types::LabelRecord;

#[async_trait]
pub trait LabelStore: Send + Sync {
    /// `(block_number, timestamp)` rows in `[from_block, to_block]`, ascending
    async fn block_timestamps(&self, blockchain: Blockchain, from_block: u64, to_block: u64) -> Result<Vec<(u64, u64)>>;

    /// Transactions already indexed in the store; unknown hashes are absent from the result
    async fn transactions_by_hash(&self, blockchain: Blockchain, hashes: &[B256]) -> Result<Vec<RawTransaction>>;

    /// Hashes among `hashes` that already carry a function-call label (null log index) named `label_name`
    async fn existing_function_call_hashes(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        hashes: &[String],
    ) -> Result<HashSet<String>>;

    /// Highest labeled block for `label_name` in `[from_block, to_block]`
    async fn max_labeled_block(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Option<u64>>;

    /// Insert all records in one transaction; either every row lands or none does
    async fn write_labels(&self, blockchain: Blockchain, records: &[LabelRecord]) -> Result<usize>;
}
