use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use serde::Deserialize;

use crate::blockchain::Blockchain;
use crate::error::{CrawlerError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct ChainCfg {
    pub http_rpc_url: String,
    pub timeout_secs: Option<u64>, // 30 seconds if not set
}

impl ChainCfg {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PgCfg {
    pub dsn: String,
    pub schema: Option<String>, // path to a DDL file, the bundled schema is used otherwise
    pub statement_timeout_secs: Option<u64>,
    pub pool_size: Option<u32>, // one connection per worker plus one if not set
}

impl PgCfg {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs.unwrap_or(60))
    }

    pub fn pool_size(&self, workers: usize) -> u32 {
        self.pool_size
            .unwrap_or_else(|| u32::try_from(workers).unwrap_or(u32::MAX).saturating_add(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerCfg {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_db_block_query_batch")]
    pub db_block_query_batch: u64,
}

impl Default for CrawlerCfg {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            db_block_query_batch: default_db_block_query_batch(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> u64 {
    100
}

fn default_db_block_query_batch() -> u64 {
    10
}

/// Transaction labeling job
#[derive(Debug, Deserialize, Clone)]
pub struct JobCfg {
    pub label_name: String,
    pub blockchain: Blockchain,
    pub abi_path: String,
    #[serde(default)]
    pub secondary_abi_paths: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub from_block: u64,
    pub to_block: Option<u64>, // latest block if not set
    pub batch_size: Option<u64>,
}

/// Event-only labeling job
#[derive(Debug, Deserialize, Clone)]
pub struct EventJobCfg {
    pub label_name: String,
    pub blockchain: Blockchain,
    pub abi_path: String,
    pub event_name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub from_block: u64,
    pub to_block: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppCfg {
    pub chains: HashMap<Blockchain, ChainCfg>,
    pub postgres: PgCfg,
    #[serde(default)]
    pub crawler: CrawlerCfg,
    #[serde(default)]
    pub jobs: Vec<JobCfg>,
    #[serde(default)]
    pub event_jobs: Vec<EventJobCfg>,
}

impl AppCfg {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CrawlerError::Config(format!("Cannot read config file {:?}: {}", path, e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| CrawlerError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawler.workers == 0 {
            return Err(CrawlerError::Config("crawler.workers must be at least 1".to_string()));
        }
        if self.crawler.batch_size == 0 {
            return Err(CrawlerError::Config("crawler.batch_size must be at least 1".to_string()));
        }
        if self.crawler.db_block_query_batch == 0 {
            return Err(CrawlerError::Config(
                "crawler.db_block_query_batch must be at least 1".to_string(),
            ));
        }

        if let Some(pool_size) = self.postgres.pool_size {
            if (pool_size as usize) < self.crawler.workers {
                return Err(CrawlerError::Config(format!(
                    "postgres.pool_size {} is smaller than crawler.workers {}",
                    pool_size, self.crawler.workers
                )));
            }
        }

        for job in &self.jobs {
            self.check_job(&job.label_name, job.blockchain, job.from_block, job.to_block)?;
            parse_addresses(&job.addresses)?;
            if job.batch_size == Some(0) {
                return Err(CrawlerError::Config(format!("Job {} has a zero batch size", job.label_name)));
            }
        }
        for job in &self.event_jobs {
            self.check_job(&job.label_name, job.blockchain, job.from_block, job.to_block)?;
            parse_addresses(&job.addresses)?;
        }
        Ok(())
    }

    fn check_job(&self, label_name: &str, blockchain: Blockchain, from_block: u64, to_block: Option<u64>) -> Result<()> {
        if label_name.trim().is_empty() {
            return Err(CrawlerError::Config("Job label_name must not be empty".to_string()));
        }
        if !self.chains.contains_key(&blockchain) {
            return Err(CrawlerError::Config(format!(
                "Job {} targets {} which has no chain configured",
                label_name, blockchain
            )));
        }
        if let Some(to_block) = to_block {
            if from_block > to_block {
                return Err(CrawlerError::Config(format!(
                    "Job {} starts at {} past its end block {}",
                    label_name, from_block, to_block
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_addresses(raw: &[String]) -> Result<Vec<Address>> {
    raw.iter()
        .map(|a| Address::from_str(a.trim()).map_err(|e| CrawlerError::Config(format!("Invalid address {}: {}", a, e))))
        .collect()
}
