use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_json_abi::{Event as EventAbi, JsonAbi};
use alloy_primitives::{Address, B256};
use tracing::{debug, info, warn};

use crate::abi::event_entries;
use crate::blockchain::Blockchain;
use crate::cache::BlockTimestampCache;
use crate::chain::{ChainClient, RawTransaction};
use crate::decoder::{decode_first_match, FunctionDecoder, LogDecoder};
use crate::error::{CrawlerError, Result};
use crate::event_crawler::{CrawlJob, EventCrawler};
use crate::store::LabelStore;
use crate::types::{Event, FunctionCall};
use crate::writer::LabelWriter;

/// Store prefetch size when timestamping logs of a window
pub const EVENT_TIMESTAMP_BATCH: u64 = 1000;
/// Store prefetch size when timestamping transactions of a window
pub const TX_TIMESTAMP_BATCH: u64 = 100;

/// Everything a transaction-labeling run needs.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub blockchain: Blockchain,
    pub label_name: String,
    /// Events that select transactions and functions that decode their input
    pub primary_abi: JsonAbi,
    /// Tried in order against every receipt log
    pub secondary_abis: Vec<EventAbi>,
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Option<Vec<Address>>,
    pub batch_size: u64,
}

impl CrawlRequest {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CrawlerError::Validation("Batch size must be at least 1".to_string()));
        }
        if self.from_block > self.to_block {
            return Err(CrawlerError::Validation(format!(
                "Start block {} is past end block {}",
                self.from_block, self.to_block
            )));
        }
        if self.label_name.trim().is_empty() {
            return Err(CrawlerError::Validation("Label name must not be empty".to_string()));
        }
        if self.primary_abi.events().next().is_none() {
            return Err(CrawlerError::Validation(
                "Primary ABI has no events to select transactions with".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub windows: u64,
    pub blocks_processed: u64,
    pub events_discovered: usize,
    pub transactions: usize,
    pub function_calls_written: usize,
    pub duplicates_skipped: usize,
    pub events_written: usize,
    pub unknown_calls: usize,
}

impl CrawlSummary {
    pub fn labels_written(&self) -> usize {
        self.function_calls_written + self.events_written
    }
}

/// Labels the transactions that emitted primary-ABI events: one function call
/// label per transaction plus the receipt logs that decode against the
/// secondary ABIs.
pub struct GenericCrawler {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn LabelStore>,
    progress: Arc<AtomicU64>,
}

impl GenericCrawler {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<dyn LabelStore>) -> Self {
        Self {
            chain,
            store,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of blocks processed, only ever incremented
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    pub async fn crawl(&self, request: &CrawlRequest) -> Result<CrawlSummary> {
        request.validate()?;
        if self.chain.blockchain() != request.blockchain {
            return Err(CrawlerError::Validation(format!(
                "Request targets {} but the chain client is connected to {}",
                request.blockchain,
                self.chain.blockchain()
            )));
        }

        let contracts = request.addresses.clone().unwrap_or_default();
        let jobs: Vec<CrawlJob> = event_entries(&request.primary_abi)
            .into_iter()
            .map(|event| CrawlJob::new(event, contracts.clone(), request.label_name.clone()))
            .collect();
        let function_decoder = FunctionDecoder::new(&request.primary_abi);
        if function_decoder.is_empty() {
            warn!("{} ABI has no functions, calls are labeled by selector only", request.label_name);
        } else {
            debug!("{} functions known for {}", function_decoder.len(), request.label_name);
        }
        let secondary_decoders: Vec<LogDecoder> = request.secondary_abis.iter().cloned().map(LogDecoder::new).collect();

        let event_crawler = EventCrawler::new(self.chain.clone(), self.store.clone());
        let writer = LabelWriter::new(self.store.clone(), request.blockchain);
        let mut event_cache = BlockTimestampCache::new();
        let mut tx_cache = BlockTimestampCache::new();
        let mut summary = CrawlSummary::default();

        info!(
            "Crawling {} on {} from block {} to {} with batch size {}",
            request.label_name, request.blockchain, request.from_block, request.to_block, request.batch_size
        );

        let mut current = request.from_block;
        while current <= request.to_block {
            let batch_end = current.saturating_add(request.batch_size).min(request.to_block);
            debug!("Processing window {}-{}", current, batch_end);

            let events = event_crawler
                .scan(&jobs, current, batch_end, &mut event_cache, EVENT_TIMESTAMP_BATCH)
                .await?;
            summary.events_discovered += events.len();

            let hashes = distinct_transaction_hashes(&events);
            let transactions = self.resolve_transactions(request.blockchain, &hashes).await?;
            summary.transactions += transactions.len();

            let mut function_calls = Vec::with_capacity(transactions.len());
            let mut secondary_events = Vec::new();
            for tx in &transactions {
                let (call, logs) = self
                    .process_transaction(tx, &function_decoder, &secondary_decoders, &mut tx_cache)
                    .await?;
                if !call.is_decoded() {
                    summary.unknown_calls += 1;
                }
                function_calls.push(call);
                secondary_events.extend(logs);
            }

            let outcome = writer
                .write(&request.label_name, &secondary_events, &function_calls)
                .await?;
            summary.function_calls_written += outcome.function_calls_written;
            summary.duplicates_skipped += outcome.duplicates_skipped;
            summary.events_written += outcome.events_written;
            summary.windows += 1;

            let processed = batch_end - current + 1;
            summary.blocks_processed += processed;
            self.progress.fetch_add(processed, Ordering::Relaxed);

            if batch_end == u64::MAX {
                break;
            }
            current = batch_end + 1;
        }

        info!(
            "Finished {} on {}: {} function calls, {} events written, {} duplicates skipped",
            request.label_name,
            request.blockchain,
            summary.function_calls_written,
            summary.events_written,
            summary.duplicates_skipped
        );
        Ok(summary)
    }

    /// Transactions for `hashes` in the same order, from the store when indexed
    /// and from the node otherwise.
    async fn resolve_transactions(&self, blockchain: Blockchain, hashes: &[B256]) -> Result<Vec<RawTransaction>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let mut indexed: HashMap<B256, RawTransaction> = self
            .store
            .transactions_by_hash(blockchain, hashes)
            .await?
            .into_iter()
            .map(|tx| (tx.hash, tx))
            .collect();

        let mut transactions = Vec::with_capacity(hashes.len());
        let mut fetched = 0;
        for hash in hashes {
            match indexed.remove(hash) {
                Some(tx) => transactions.push(tx),
                None => {
                    transactions.push(self.chain.get_transaction(*hash).await?);
                    fetched += 1;
                }
            }
        }

        if fetched > 0 {
            debug!("Fetched {} transactions missing from the store", fetched);
        }
        Ok(transactions)
    }

    async fn process_transaction(
        &self,
        tx: &RawTransaction,
        function_decoder: &FunctionDecoder,
        secondary_decoders: &[LogDecoder],
        cache: &mut BlockTimestampCache,
    ) -> Result<(FunctionCall, Vec<Event>)> {
        let (function_name, function_args) = function_decoder.decode_or_selector(&tx.input);
        let receipt = self.chain.get_transaction_receipt(tx.hash).await?;
        let block_timestamp = cache
            .resolve(self.chain.as_ref(), self.store.as_ref(), tx.block_number, TX_TIMESTAMP_BATCH)
            .await?;

        let events = receipt
            .logs
            .iter()
            .filter_map(|log| {
                decode_first_match(secondary_decoders, log).map(|decoded| Event {
                    event_name: decoded.name,
                    args: decoded.args,
                    address: log.address,
                    block_number: log.block_number,
                    block_timestamp,
                    transaction_hash: log.transaction_hash,
                    log_index: log.log_index,
                })
            })
            .collect();

        let call = FunctionCall {
            block_number: tx.block_number,
            block_timestamp,
            transaction_hash: tx.hash,
            contract_address: tx.to,
            caller_address: tx.from,
            function_name,
            function_args,
            status: receipt.status as u64,
            gas_used: receipt.gas_used,
            gas_price: tx.gas_price,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        };

        Ok((call, events))
    }
}

/// Distinct hashes of `events`, in the order they were first seen
pub fn distinct_transaction_hashes(events: &[Event]) -> Vec<B256> {
    let mut seen = HashSet::new();
    events
        .iter()
        .map(|event| event.transaction_hash)
        .filter(|hash| seen.insert(*hash))
        .collect()
}
