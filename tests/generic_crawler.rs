mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use alloy_primitives::Bytes;
use serde_json::json;

use common::*;
use label_crawler::store::memory::MemoryStore;
use label_crawler::types::LabelData;
use label_crawler::{
    resume_point, Blockchain, ChainClient, CrawlRequest, CrawlerError, GenericCrawler, LabelRecord, LabelStore,
};

const LABEL: &str = "moonworm-alpha";

fn request(from_block: u64, to_block: u64, batch_size: u64) -> CrawlRequest {
    CrawlRequest {
        blockchain: Blockchain::Polygon,
        label_name: LABEL.to_string(),
        primary_abi: token_abi(),
        secondary_abis: event_abis(APPROVAL_ABI),
        from_block,
        to_block,
        addresses: Some(vec![contract()]),
        batch_size,
    }
}

/// Blocks 100..=110 with a single `transfer` at block 105 that emits a
/// `Transfer` and an `Approval`.
fn scenario() -> (Arc<MockChain>, Arc<MemoryStore>) {
    let chain = Arc::new(MockChain::new(Blockchain::Polygon, 110).with_blocks(100, 110));
    let store = indexed_store(Blockchain::Polygon, 100, 110);

    let hash = tx_hash(0x05);
    let transfer = transfer_log(500, 105, hash, 0);
    chain.add_log(transfer.clone());
    chain.add_transaction(
        transaction(hash, 105, transfer_input(recipient(), 500)),
        true,
        vec![transfer, approval_log(7, 105, hash, 1)],
    );

    (chain, store)
}

fn function_calls(records: &[LabelRecord]) -> Vec<&LabelRecord> {
    records.iter().filter(|r| r.is_function_call()).collect()
}

#[tokio::test]
async fn test_single_event_yields_one_function_call_across_windows() {
    let (chain, store) = scenario();
    let crawler = GenericCrawler::new(chain.clone(), store.clone());

    let summary = crawler.crawl(&request(100, 110, 5)).await.unwrap();
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.blocks_processed, 11);
    assert_eq!(summary.events_discovered, 1);
    assert_eq!(summary.function_calls_written, 1);
    assert_eq!(summary.events_written, 1);
    assert_eq!(crawler.progress().load(Ordering::Relaxed), 11);

    let labels = store.labels(Blockchain::Polygon).unwrap();
    let calls = function_calls(&labels);
    assert_eq!(calls.len(), 1);

    let call = calls[0];
    assert_eq!(call.label_name, LABEL);
    assert_eq!(call.block_number, 105);
    assert_eq!(call.block_timestamp, block_timestamp(105));
    assert_eq!(call.transaction_hash, format!("{:#x}", tx_hash(0x05)));
    assert_eq!(call.address, Some(contract().to_string()));
    assert_eq!(call.log_index, None);

    let payload = serde_json::to_value(&call.label_data).unwrap();
    assert_eq!(payload["type"], "tx_call");
    assert_eq!(payload["name"], "transfer");
    assert_eq!(payload["caller"], caller().to_string());
    assert_eq!(payload["args"], json!({"to": recipient().to_string(), "amount": "500"}));
    assert_eq!(payload["status"], 1);
    assert_eq!(payload["gasUsed"], 51_234);

    // The primary Transfer log is not relabeled, only the secondary Approval is
    let events: Vec<&LabelRecord> = labels.iter().filter(|r| !r.is_function_call()).collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].log_index, Some(1));
    assert_eq!(events[0].block_timestamp, block_timestamp(105));
    match &events[0].label_data {
        LabelData::Event(event) => {
            assert_eq!(event.name, "Approval");
            assert_eq!(event.args["value"], "7");
        }
        other => panic!("expected an event label, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_function_calls() {
    let (chain, store) = scenario();
    let crawler = GenericCrawler::new(chain, store.clone());

    crawler.crawl(&request(100, 110, 5)).await.unwrap();
    let after_first = resume_point(store.as_ref(), Blockchain::Polygon, LABEL, 100, 110).await.unwrap();
    let second = crawler.crawl(&request(100, 110, 5)).await.unwrap();
    let after_second = resume_point(store.as_ref(), Blockchain::Polygon, LABEL, 100, 110).await.unwrap();

    assert_eq!(after_first, 106);
    assert_eq!(after_second, after_first);
    assert_eq!(second.function_calls_written, 0);
    assert_eq!(second.duplicates_skipped, 1);
    let labels = store.labels(Blockchain::Polygon).unwrap();
    assert_eq!(function_calls(&labels).len(), 1);
}

#[tokio::test]
async fn test_checkpoint_after_crawl() {
    let (chain, store) = scenario();
    GenericCrawler::new(chain, store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap();

    let resume = resume_point(store.as_ref(), Blockchain::Polygon, LABEL, 100, 110).await.unwrap();
    assert_eq!(resume, 106);

    // Nothing new past the last label
    let store_dyn: Arc<dyn LabelStore> = store.clone();
    let chain = Arc::new(MockChain::new(Blockchain::Polygon, 110).with_blocks(100, 110));
    let summary = GenericCrawler::new(chain, store_dyn).crawl(&request(resume, 110, 5)).await.unwrap();
    assert_eq!(summary.labels_written(), 0);
    assert_eq!(summary.windows, 1);
}

#[tokio::test]
async fn test_unknown_selector_is_labeled_with_sentinel() {
    let chain = Arc::new(MockChain::new(Blockchain::Polygon, 110).with_blocks(100, 110));
    let store = indexed_store(Blockchain::Polygon, 100, 110);
    let hash = tx_hash(0x09);
    let log = transfer_log(1, 103, hash, 0);
    chain.add_log(log.clone());
    chain.add_transaction(
        transaction(hash, 103, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x01])),
        false,
        vec![log],
    );

    let summary = GenericCrawler::new(chain, store.clone())
        .crawl(&request(100, 110, 20))
        .await
        .unwrap();
    assert_eq!(summary.unknown_calls, 1);
    assert_eq!(summary.function_calls_written, 1);

    let labels = store.labels(Blockchain::Polygon).unwrap();
    let payload = serde_json::to_value(&function_calls(&labels)[0].label_data).unwrap();
    assert_eq!(payload["name"], "0xdeadbeef");
    assert_eq!(payload["args"], "unknown");
    assert_eq!(payload["status"], 0);
}

#[tokio::test]
async fn test_first_matching_secondary_abi_wins() {
    let chain = Arc::new(MockChain::new(Blockchain::Polygon, 110).with_blocks(100, 110));
    let store = indexed_store(Blockchain::Polygon, 100, 110);
    let hash = tx_hash(0x11);
    let log = transfer_log(1, 101, hash, 0);
    chain.add_log(log.clone());

    let mut unrelated = approval_log(3, 101, hash, 2);
    unrelated.topics[0] = alloy_primitives::keccak256("Unrelated(address,address,uint256)");
    chain.add_transaction(
        transaction(hash, 101, transfer_input(recipient(), 1)),
        true,
        vec![log, approval_log(3, 101, hash, 1), unrelated],
    );

    let mut req = request(100, 110, 20);
    req.secondary_abis = event_abis(APPROVAL_RENAMED_ABI);
    req.secondary_abis.extend(event_abis(APPROVAL_ABI));

    GenericCrawler::new(chain, store.clone()).crawl(&req).await.unwrap();

    let labels = store.labels(Blockchain::Polygon).unwrap();
    let events: Vec<&LabelRecord> = labels.iter().filter(|r| !r.is_function_call()).collect();
    assert_eq!(events.len(), 1);
    let payload = serde_json::to_value(&events[0].label_data).unwrap();
    assert_eq!(payload["args"]["allowance"], "3");
    assert!(payload["args"].get("value").is_none());
}

#[tokio::test]
async fn test_transaction_missing_from_store_is_fetched_from_node() {
    let (chain, store) = scenario();
    GenericCrawler::new(chain.clone(), store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap();
    assert_eq!(chain.transaction_calls.load(Ordering::SeqCst), 1);

    let (chain, store) = scenario();
    store
        .insert_transaction(
            Blockchain::Polygon,
            transaction(tx_hash(0x05), 105, transfer_input(recipient(), 500)),
        )
        .unwrap();
    GenericCrawler::new(chain.clone(), store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap();
    assert_eq!(chain.transaction_calls.load(Ordering::SeqCst), 0);
    assert_eq!(function_calls(&store.labels(Blockchain::Polygon).unwrap()).len(), 1);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_labels() {
    let (chain, _) = scenario();
    let store = Arc::new(FlakyStore::new(true));

    let err = GenericCrawler::new(chain.clone(), store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlerError::Store(_)));
    assert!(store.inner.labels(Blockchain::Polygon).unwrap().is_empty());

    // A rerun over the same range recovers
    store.fail_writes(false);
    let summary = GenericCrawler::new(chain, store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap();
    assert_eq!(summary.function_calls_written, 1);
}

#[tokio::test]
async fn test_chain_error_aborts_the_window() {
    let (chain, store) = scenario();
    chain.fail_receipts(true);

    let err = GenericCrawler::new(chain, store.clone())
        .crawl(&request(100, 110, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlerError::Chain(_)));
    assert!(store.labels(Blockchain::Polygon).unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_requests_do_no_work() {
    let (chain, store) = scenario();
    let crawler = GenericCrawler::new(chain.clone(), store);

    let err = crawler.crawl(&request(100, 110, 0)).await.unwrap_err();
    assert!(matches!(err, CrawlerError::Validation(_)));

    let err = crawler.crawl(&request(111, 110, 5)).await.unwrap_err();
    assert!(matches!(err, CrawlerError::Validation(_)));

    let mut wrong_chain = request(100, 110, 5);
    wrong_chain.blockchain = Blockchain::Ethereum;
    let err = crawler.crawl(&wrong_chain).await.unwrap_err();
    assert!(matches!(err, CrawlerError::Validation(_)));

    assert_eq!(chain.receipt_calls.load(Ordering::SeqCst), 0);
    assert_eq!(chain.blockchain(), Blockchain::Polygon);
}
