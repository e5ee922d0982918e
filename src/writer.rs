use std::sync::Arc;

use tracing::{debug, info};

use crate::blockchain::Blockchain;
use crate::error::Result;
use crate::store::LabelStore;
use crate::types::{tx_hash_hex, Event, FunctionCall, LabelRecord};

/// Counts from one window commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub function_calls_written: usize,
    pub duplicates_skipped: usize,
    pub events_written: usize,
}

impl WriteOutcome {
    pub fn total(&self) -> usize {
        self.function_calls_written + self.events_written
    }
}

/// Turns a window's decoded calls and events into label rows and commits them.
pub struct LabelWriter {
    store: Arc<dyn LabelStore>,
    blockchain: Blockchain,
}

impl LabelWriter {
    pub fn new(store: Arc<dyn LabelStore>, blockchain: Blockchain) -> Self {
        Self { store, blockchain }
    }

    /// Build the rows to insert. Function calls already labeled under
    /// `label_name` are dropped; events are passed through as is.
    pub async fn prepare(
        &self,
        label_name: &str,
        events: &[Event],
        function_calls: &[FunctionCall],
    ) -> Result<(Vec<LabelRecord>, usize)> {
        let hashes: Vec<String> = function_calls
            .iter()
            .map(|call| tx_hash_hex(&call.transaction_hash))
            .collect();
        let existing = self
            .store
            .existing_function_call_hashes(self.blockchain, label_name, &hashes)
            .await?;

        let mut records = Vec::with_capacity(function_calls.len() + events.len());
        let mut duplicates = 0;
        for call in function_calls {
            if existing.contains(&tx_hash_hex(&call.transaction_hash)) {
                duplicates += 1;
                continue;
            }
            records.push(LabelRecord::from_function_call(label_name, call));
        }
        records.extend(events.iter().map(|event| LabelRecord::from_event(label_name, event)));

        if duplicates > 0 {
            debug!("Skipping {} already labeled function calls for {}", duplicates, label_name);
        }
        Ok((records, duplicates))
    }

    pub async fn write(
        &self,
        label_name: &str,
        events: &[Event],
        function_calls: &[FunctionCall],
    ) -> Result<WriteOutcome> {
        let (records, duplicates_skipped) = self.prepare(label_name, events, function_calls).await?;
        let function_calls_written = records.iter().filter(|r| r.is_function_call()).count();
        let events_written = records.len() - function_calls_written;

        self.commit(&records).await?;

        Ok(WriteOutcome {
            function_calls_written,
            duplicates_skipped,
            events_written,
        })
    }

    pub async fn commit(&self, records: &[LabelRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let written = self.store.write_labels(self.blockchain, records).await?;
        info!("Saved {} labels to {}", written, self.blockchain.labels_table());
        Ok(written)
    }
}
