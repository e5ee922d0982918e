use std::sync::Arc;

use alloy_json_abi::Event as EventAbi;
use alloy_primitives::Address;
use tracing::{debug, info, warn};

use crate::cache::BlockTimestampCache;
use crate::chain::{ChainClient, LogFilter};
use crate::decoder::LogDecoder;
use crate::error::{CrawlerError, Result};
use crate::generic_crawler::CrawlSummary;
use crate::store::LabelStore;
use crate::types::{Event, LabelRecord};
use crate::writer::LabelWriter;

/// One event signature to collect, optionally restricted to some contracts.
/// Blocks outside `[start_block, end_block]` are never scanned for the job,
/// whatever window it is part of.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub contracts: Vec<Address>,
    pub event_abi: EventAbi,
    pub label_name: String,
    pub start_block: u64,
    pub end_block: u64,
}

impl CrawlJob {
    pub fn new(event_abi: EventAbi, contracts: Vec<Address>, label_name: impl Into<String>) -> Self {
        Self {
            contracts,
            event_abi,
            label_name: label_name.into(),
            start_block: 0,
            end_block: u64::MAX,
        }
    }

    pub fn with_range(mut self, start_block: u64, end_block: u64) -> Self {
        self.start_block = start_block;
        self.end_block = end_block;
        self
    }

    /// Part of `[from_block, to_block]` the job covers, if any
    pub fn clip(&self, from_block: u64, to_block: u64) -> Option<(u64, u64)> {
        let from = from_block.max(self.start_block);
        let to = to_block.min(self.end_block);
        (from <= to).then_some((from, to))
    }

    pub fn is_empty(&self) -> bool {
        self.start_block > self.end_block
    }
}

pub struct EventCrawler {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn LabelStore>,
}

impl EventCrawler {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<dyn LabelStore>) -> Self {
        Self { chain, store }
    }

    /// Decoded events of every job in `[from_block, to_block]`, job by job.
    pub async fn scan(
        &self,
        jobs: &[CrawlJob],
        from_block: u64,
        to_block: u64,
        cache: &mut BlockTimestampCache,
        db_batch_size: u64,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for job in jobs {
            events.extend(self.scan_job(job, from_block, to_block, cache, db_batch_size).await?);
        }
        Ok(events)
    }

    pub async fn scan_job(
        &self,
        job: &CrawlJob,
        from_block: u64,
        to_block: u64,
        cache: &mut BlockTimestampCache,
        db_batch_size: u64,
    ) -> Result<Vec<Event>> {
        let Some((from_block, to_block)) = job.clip(from_block, to_block) else {
            return Ok(Vec::new());
        };

        let decoder = LogDecoder::new(job.event_abi.clone());
        let filter = LogFilter {
            addresses: job.contracts.clone(),
            topic0: decoder.topic0(),
            from_block,
            to_block,
        };

        let logs = self.chain.get_logs(&filter).await?;
        let mut events = Vec::with_capacity(logs.len());

        for log in &logs {
            let decoded = match decoder.decode(log) {
                Ok(decoded) => decoded,
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Skipping log {} of tx {:#x} at block {}: {}",
                        log.log_index, log.transaction_hash, log.block_number, e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let block_timestamp = cache
                .resolve(self.chain.as_ref(), self.store.as_ref(), log.block_number, db_batch_size)
                .await?;

            events.push(Event {
                event_name: decoded.name,
                args: decoded.args,
                address: log.address,
                block_number: log.block_number,
                block_timestamp,
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
            });
        }

        debug!(
            "{} {} events in blocks {}-{}",
            events.len(),
            decoder.event().name,
            from_block,
            to_block
        );
        Ok(events)
    }

    /// Scan `[from_block, to_block]` window by window and store the events of
    /// each job under its label. Every window is one commit.
    pub async fn crawl(
        &self,
        jobs: &[CrawlJob],
        from_block: u64,
        to_block: u64,
        batch_size: u64,
        db_batch_size: u64,
    ) -> Result<CrawlSummary> {
        if batch_size == 0 {
            return Err(CrawlerError::Validation("Batch size must be at least 1".to_string()));
        }
        if from_block > to_block {
            return Err(CrawlerError::Validation(format!(
                "Start block {} is past end block {}",
                from_block, to_block
            )));
        }
        if jobs.is_empty() {
            return Err(CrawlerError::Validation("No event jobs to crawl".to_string()));
        }

        let blockchain = self.chain.blockchain();
        let writer = LabelWriter::new(self.store.clone(), blockchain);
        let mut cache = BlockTimestampCache::new();
        let mut summary = CrawlSummary::default();
        let mut current = from_block;

        info!(
            "Crawling {} event jobs on {} from block {} to {}",
            jobs.len(),
            blockchain,
            from_block,
            to_block
        );

        while current <= to_block {
            let batch_end = current.saturating_add(batch_size).min(to_block);

            let mut records = Vec::new();
            for job in jobs {
                let events = self.scan_job(job, current, batch_end, &mut cache, db_batch_size).await?;
                summary.events_discovered += events.len();
                records.extend(events.iter().map(|event| LabelRecord::from_event(&job.label_name, event)));
            }

            summary.events_written += writer.commit(&records).await?;
            summary.windows += 1;
            summary.blocks_processed += batch_end - current + 1;

            if batch_end == u64::MAX {
                break;
            }
            current = batch_end + 1;
        }

        Ok(summary)
    }
}
