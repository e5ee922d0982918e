use std::collections::HashMap;

use tracing::debug;

use crate::chain::ChainClient;
use crate::error::{CrawlerError, Result};
use crate::store::LabelStore;

/// Block number to timestamp map scoped to one crawl run.
///
/// Lookups go memory, then the store's blocks table, then the chain. A store
/// hit prefetches the `max_batch` blocks starting at the target, so a run
/// walking forward through a window mostly answers from memory. The map is
/// cleared once it holds more than twice `max_batch` entries.
#[derive(Debug, Default)]
pub struct BlockTimestampCache {
    entries: HashMap<u64, u64>,
}

impl BlockTimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, block_number: u64) -> Option<u64> {
        self.entries.get(&block_number).copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub async fn resolve(
        &mut self,
        chain: &dyn ChainClient,
        store: &dyn LabelStore,
        block_number: u64,
        max_batch: u64,
    ) -> Result<u64> {
        if max_batch == 0 {
            return Err(CrawlerError::Validation(
                "Timestamp prefetch batch must be at least 1".to_string(),
            ));
        }
        if let Some(timestamp) = self.get(block_number) {
            return Ok(timestamp);
        }

        let window_end = block_number.saturating_add(max_batch - 1);
        let rows = store
            .block_timestamps(chain.blockchain(), block_number, window_end)
            .await?;

        let timestamp = match rows.first() {
            Some((number, timestamp)) if *number == block_number => *timestamp,
            _ => {
                debug!("Block {} not indexed on {}, asking the node", block_number, chain.blockchain());
                chain.get_block_timestamp(block_number).await?
            }
        };

        if self.entries.len() as u64 > max_batch.saturating_mul(2) {
            self.entries.clear();
        }
        self.entries.insert(block_number, timestamp);
        self.entries.extend(rows);

        Ok(timestamp)
    }
}
