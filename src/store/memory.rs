use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::blockchain::Blockchain;
use crate::chain::RawTransaction;
use crate::error::{CrawlerError, Result};
use crate::store::LabelStore;
use crate::types::{tx_hash_hex, LabelRecord};

#[derive(Debug, Default)]
struct ChainState {
    blocks: BTreeMap<u64, u64>,
    transactions: HashMap<String, RawTransaction>,
    labels: Vec<LabelRecord>,
}

/// In-process store keyed by chain. Used for dry runs and tests; it keeps the
/// same atomic write contract as the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chains: Mutex<HashMap<Blockchain, ChainState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Blockchain, ChainState>>> {
        self.chains
            .lock()
            .map_err(|_| CrawlerError::Store("Memory store lock poisoned".to_string()))
    }

    pub fn insert_block(&self, blockchain: Blockchain, block_number: u64, timestamp: u64) -> Result<()> {
        self.lock()?.entry(blockchain).or_default().blocks.insert(block_number, timestamp);
        Ok(())
    }

    pub fn insert_transaction(&self, blockchain: Blockchain, tx: RawTransaction) -> Result<()> {
        self.lock()?
            .entry(blockchain)
            .or_default()
            .transactions
            .insert(tx_hash_hex(&tx.hash), tx);
        Ok(())
    }

    /// Snapshot of every label written for `blockchain`, in insertion order
    pub fn labels(&self, blockchain: Blockchain) -> Result<Vec<LabelRecord>> {
        Ok(self
            .lock()?
            .get(&blockchain)
            .map(|state| state.labels.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LabelStore for MemoryStore {
    async fn block_timestamps(&self, blockchain: Blockchain, from_block: u64, to_block: u64) -> Result<Vec<(u64, u64)>> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        Ok(self
            .lock()?
            .get(&blockchain)
            .map(|state| {
                state
                    .blocks
                    .range(from_block..=to_block)
                    .map(|(number, timestamp)| (*number, *timestamp))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn transactions_by_hash(&self, blockchain: Blockchain, hashes: &[B256]) -> Result<Vec<RawTransaction>> {
        let chains = self.lock()?;
        let Some(state) = chains.get(&blockchain) else {
            return Ok(Vec::new());
        };
        Ok(hashes
            .iter()
            .filter_map(|hash| state.transactions.get(&tx_hash_hex(hash)).cloned())
            .collect())
    }

    async fn existing_function_call_hashes(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        hashes: &[String],
    ) -> Result<HashSet<String>> {
        let wanted: HashSet<&str> = hashes.iter().map(String::as_str).collect();
        let chains = self.lock()?;
        let Some(state) = chains.get(&blockchain) else {
            return Ok(HashSet::new());
        };
        Ok(state
            .labels
            .iter()
            .filter(|r| r.label_name == label_name && r.log_index.is_none())
            .filter(|r| wanted.contains(r.transaction_hash.as_str()))
            .map(|r| r.transaction_hash.clone())
            .collect())
    }

    async fn max_labeled_block(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Option<u64>> {
        let chains = self.lock()?;
        Ok(chains.get(&blockchain).and_then(|state| {
            state
                .labels
                .iter()
                .filter(|r| r.label_name == label_name)
                .filter(|r| r.block_number >= from_block && r.block_number <= to_block)
                .map(|r| r.block_number)
                .max()
        }))
    }

    async fn write_labels(&self, blockchain: Blockchain, records: &[LabelRecord]) -> Result<usize> {
        // Single lock scope: readers never observe a partial batch.
        let mut chains = self.lock()?;
        chains.entry(blockchain).or_default().labels.extend_from_slice(records);
        Ok(records.len())
    }
}
