#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_json_abi::{Event as EventAbi, JsonAbi};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;

use label_crawler::store::memory::MemoryStore;
use label_crawler::{
    Blockchain, ChainClient, CrawlerError, LabelRecord, LabelStore, LogFilter, RawLog, RawReceipt, RawTransaction,
    Result,
};

pub const TOKEN_ABI: &str = r#"[
    {
        "type": "event",
        "name": "Transfer",
        "anonymous": false,
        "inputs": [
            {"name": "from", "type": "address", "indexed": true},
            {"name": "to", "type": "address", "indexed": true},
            {"name": "value", "type": "uint256", "indexed": false}
        ]
    },
    {
        "type": "function",
        "name": "transfer",
        "stateMutability": "nonpayable",
        "inputs": [
            {"name": "to", "type": "address"},
            {"name": "amount", "type": "uint256"}
        ],
        "outputs": [{"name": "", "type": "bool"}]
    }
]"#;

pub const APPROVAL_ABI: &str = r#"[
    {
        "type": "event",
        "name": "Approval",
        "anonymous": false,
        "inputs": [
            {"name": "owner", "type": "address", "indexed": true},
            {"name": "spender", "type": "address", "indexed": true},
            {"name": "value", "type": "uint256", "indexed": false}
        ]
    }
]"#;

/// Same signature as `APPROVAL_ABI`, different argument names
pub const APPROVAL_RENAMED_ABI: &str = r#"[
    {
        "type": "event",
        "name": "Approval",
        "anonymous": false,
        "inputs": [
            {"name": "holder", "type": "address", "indexed": true},
            {"name": "operator", "type": "address", "indexed": true},
            {"name": "allowance", "type": "uint256", "indexed": false}
        ]
    }
]"#;

pub fn token_abi() -> JsonAbi {
    label_crawler::abi::parse_abi(TOKEN_ABI.as_bytes()).unwrap()
}

pub fn event_abis(raw: &str) -> Vec<EventAbi> {
    label_crawler::abi::event_entries(&label_crawler::abi::parse_abi(raw.as_bytes()).unwrap())
}

pub fn contract() -> Address {
    Address::from([0xc0; 20])
}

pub fn caller() -> Address {
    Address::from([0xaa; 20])
}

pub fn recipient() -> Address {
    Address::from([0xbb; 20])
}

pub fn tx_hash(seed: u8) -> B256 {
    B256::from([seed; 32])
}

pub fn block_timestamp(block_number: u64) -> u64 {
    1_700_000_000 + block_number * 12
}

fn word(value: u64) -> [u8; 32] {
    U256::from(value).to_be_bytes::<32>()
}

/// A `Transfer`/`Approval`-shaped log: two indexed addresses and a uint256 in data
pub fn two_address_log(
    signature: &str,
    first: Address,
    second: Address,
    value: u64,
    block_number: u64,
    hash: B256,
    log_index: u64,
) -> RawLog {
    RawLog {
        address: contract(),
        topics: vec![keccak256(signature), first.into_word(), second.into_word()],
        data: Bytes::from(word(value).to_vec()),
        block_number,
        transaction_hash: hash,
        log_index,
    }
}

pub fn transfer_log(value: u64, block_number: u64, hash: B256, log_index: u64) -> RawLog {
    two_address_log("Transfer(address,address,uint256)", caller(), recipient(), value, block_number, hash, log_index)
}

pub fn approval_log(value: u64, block_number: u64, hash: B256, log_index: u64) -> RawLog {
    two_address_log("Approval(address,address,uint256)", caller(), recipient(), value, block_number, hash, log_index)
}

/// Calldata for `transfer(address,uint256)`
pub fn transfer_input(to: Address, amount: u64) -> Bytes {
    let mut input = keccak256("transfer(address,uint256)")[..4].to_vec();
    input.extend_from_slice(to.into_word().as_slice());
    input.extend_from_slice(&word(amount));
    Bytes::from(input)
}

pub fn transaction(hash: B256, block_number: u64, input: Bytes) -> RawTransaction {
    RawTransaction {
        hash,
        block_number,
        from: caller(),
        to: Some(contract()),
        input,
        gas_price: 30_000_000_000,
        max_fee_per_gas: Some(40_000_000_000),
        max_priority_fee_per_gas: Some(1_500_000_000),
    }
}

/// Scripted chain: serves whatever blocks, logs, transactions and receipts a
/// test puts in, and counts the calls that reach it.
pub struct MockChain {
    blockchain: Blockchain,
    latest_block: u64,
    timestamps: Mutex<HashMap<u64, u64>>,
    logs: Mutex<Vec<RawLog>>,
    transactions: Mutex<HashMap<B256, RawTransaction>>,
    receipts: Mutex<HashMap<B256, RawReceipt>>,
    pub timestamp_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    fail_receipts: AtomicBool,
}

impl MockChain {
    pub fn new(blockchain: Blockchain, latest_block: u64) -> Self {
        Self {
            blockchain,
            latest_block,
            timestamps: Mutex::new(HashMap::new()),
            logs: Mutex::new(Vec::new()),
            transactions: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            timestamp_calls: AtomicUsize::new(0),
            transaction_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
            fail_receipts: AtomicBool::new(false),
        }
    }

    /// Every block in `[from, to]` with `block_timestamp`
    pub fn with_blocks(self, from: u64, to: u64) -> Self {
        {
            let mut timestamps = self.timestamps.lock().unwrap();
            for b in from..=to {
                timestamps.insert(b, block_timestamp(b));
            }
        }
        self
    }

    pub fn add_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Register a mined transaction with its receipt
    pub fn add_transaction(&self, tx: RawTransaction, status: bool, receipt_logs: Vec<RawLog>) {
        self.receipts.lock().unwrap().insert(
            tx.hash,
            RawReceipt {
                status,
                gas_used: 51_234,
                logs: receipt_logs,
            },
        );
        self.transactions.lock().unwrap().insert(tx.hash, tx);
    }

    pub fn fail_receipts(&self, fail: bool) {
        self.fail_receipts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        Ok(self.latest_block)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let mut logs: Vec<RawLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        self.timestamps
            .lock()
            .unwrap()
            .get(&block_number)
            .copied()
            .ok_or_else(|| CrawlerError::Chain(format!("Block {} not found", block_number)))
    }

    async fn get_transaction(&self, hash: B256) -> Result<RawTransaction> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.transactions
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| CrawlerError::Chain(format!("Transaction {:#x} not found", hash)))
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<RawReceipt> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_receipts.load(Ordering::SeqCst) {
            return Err(CrawlerError::Chain("node unavailable".to_string()));
        }
        self.receipts
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| CrawlerError::Chain(format!("Receipt for {:#x} not found", hash)))
    }
}

/// Memory store whose label writes can be switched to fail
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(fail_writes: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(fail_writes),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LabelStore for FlakyStore {
    async fn block_timestamps(&self, blockchain: Blockchain, from_block: u64, to_block: u64) -> Result<Vec<(u64, u64)>> {
        self.inner.block_timestamps(blockchain, from_block, to_block).await
    }

    async fn transactions_by_hash(&self, blockchain: Blockchain, hashes: &[B256]) -> Result<Vec<RawTransaction>> {
        self.inner.transactions_by_hash(blockchain, hashes).await
    }

    async fn existing_function_call_hashes(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        hashes: &[String],
    ) -> Result<HashSet<String>> {
        self.inner.existing_function_call_hashes(blockchain, label_name, hashes).await
    }

    async fn max_labeled_block(
        &self,
        blockchain: Blockchain,
        label_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Option<u64>> {
        self.inner.max_labeled_block(blockchain, label_name, from_block, to_block).await
    }

    async fn write_labels(&self, blockchain: Blockchain, records: &[LabelRecord]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CrawlerError::Store("connection reset during commit".to_string()));
        }
        self.inner.write_labels(blockchain, records).await
    }
}

/// Store with block timestamps for `[from, to]` already indexed
pub fn indexed_store(blockchain: Blockchain, from: u64, to: u64) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for b in from..=to {
        store.insert_block(blockchain, b, block_timestamp(b)).unwrap();
    }
    Arc::new(store)
}
