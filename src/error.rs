//! Error types for the crawler

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Main error type for the crawler
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid crawl arguments, detected before any work is attempted
    #[error("Validation error: {0}")]
    Validation(String),

    /// ABI loading error
    #[error("ABI load error: {0}")]
    Abi(String),

    /// A log or call input did not decode against an ABI entry
    #[error("Decoding error: {0}")]
    Decode(String),

    /// RPC node error during block/transaction/receipt/log fetch
    #[error("Chain client error: {0}")]
    Chain(String),

    /// Store error during query, insert or commit
    #[error("Store error: {0}")]
    Store(String),

    /// A chain or store call exceeded its deadline
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// A crawl task panicked or was cancelled before reporting
    #[error("Task error: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_postgres::Error> for CrawlerError {
    fn from(e: tokio_postgres::Error) -> Self {
        CrawlerError::Store(e.to_string())
    }
}

impl CrawlerError {
    /// Decode errors degrade to sentinel values and never abandon a window
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CrawlerError::Decode(_))
    }
}
