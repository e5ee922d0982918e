//! Blockchain label crawler.
//!
//! Scans block ranges for contract events, decodes the transactions behind
//! them and stores both as labels, window by window.

pub mod abi;
pub mod blockchain;
pub mod cache;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event_crawler;
pub mod generic_crawler;
pub mod runner;
pub mod store;
pub mod types;
pub mod writer;

pub use blockchain::Blockchain;
pub use cache::BlockTimestampCache;
pub use chain::{ChainClient, LogFilter, RawLog, RawReceipt, RawTransaction};
pub use checkpoint::{resume_point, CheckpointResolver};
pub use error::{CrawlerError, Result};
pub use event_crawler::{CrawlJob, EventCrawler};
pub use generic_crawler::{CrawlRequest, CrawlSummary, GenericCrawler};
pub use runner::{CrawlRunner, CrawlTask, RunReport};
pub use store::LabelStore;
pub use types::{Event, FunctionArgs, FunctionCall, LabelData, LabelRecord};
pub use writer::{LabelWriter, WriteOutcome};
