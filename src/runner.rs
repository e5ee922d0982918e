use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::blockchain::Blockchain;
use crate::chain::ChainClient;
use crate::error::{CrawlerError, Result};
use crate::event_crawler::{CrawlJob, EventCrawler};
use crate::generic_crawler::{CrawlRequest, CrawlSummary, GenericCrawler};
use crate::store::LabelStore;

/// A run the pool can execute.
#[derive(Debug, Clone)]
pub enum CrawlTask {
    Generic(CrawlRequest),
    Events {
        blockchain: Blockchain,
        jobs: Vec<CrawlJob>,
        from_block: u64,
        to_block: u64,
        batch_size: u64,
        db_batch_size: u64,
    },
}

impl CrawlTask {
    /// Event run spanning the jobs' own ranges. Jobs with nothing left to do
    /// are dropped; `None` when no job remains.
    pub fn events(blockchain: Blockchain, jobs: Vec<CrawlJob>, batch_size: u64, db_batch_size: u64) -> Option<Self> {
        let jobs: Vec<CrawlJob> = jobs.into_iter().filter(|job| !job.is_empty()).collect();
        let from_block = jobs.iter().map(|job| job.start_block).min()?;
        let to_block = jobs.iter().map(|job| job.end_block).max()?;

        Some(CrawlTask::Events {
            blockchain,
            jobs,
            from_block,
            to_block,
            batch_size,
            db_batch_size,
        })
    }

    pub fn blockchain(&self) -> Blockchain {
        match self {
            CrawlTask::Generic(request) => request.blockchain,
            CrawlTask::Events { blockchain, .. } => *blockchain,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CrawlTask::Generic(request) => format!("{}:{}", request.blockchain, request.label_name),
            CrawlTask::Events { blockchain, jobs, .. } => {
                let events: Vec<&str> = jobs.iter().map(|job| job.event_abi.name.as_str()).collect();
                format!("{}:events[{}]", blockchain, events.join(","))
            }
        }
    }
}

/// Outcome of one run. A failed run never hides the others' results.
#[derive(Debug)]
pub struct RunReport {
    pub id: String,
    pub name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub result: Result<CrawlSummary>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs independent crawls with at most `workers` in flight. Runs share only
/// the store.
pub struct CrawlRunner {
    workers: usize,
    chains: HashMap<Blockchain, Arc<dyn ChainClient>>,
    store: Arc<dyn LabelStore>,
}

impl CrawlRunner {
    pub fn new(workers: usize, store: Arc<dyn LabelStore>) -> Self {
        Self {
            workers: workers.max(1),
            chains: HashMap::new(),
            store,
        }
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainClient>) -> Self {
        self.chains.insert(chain.blockchain(), chain);
        self
    }

    /// Reports come back in the order the tasks were given.
    pub async fn run_all(&self, tasks: Vec<CrawlTask>) -> Vec<RunReport> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles: Vec<(String, String, JoinHandle<RunReport>)> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = Uuid::new_v4().to_string();
            let name = task.name();
            let chain = self.chains.get(&task.blockchain()).cloned();
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let task_id = id.clone();
            let task_name = name.clone();

            info!("Scheduling crawl task: {} ({})", name, id);

            let handle = tokio::spawn(async move {
                let permit = semaphore.acquire_owned().await;
                let started_at = chrono::Utc::now();
                let result = match (permit, chain) {
                    (Err(e), _) => Err(CrawlerError::Task(format!("Worker pool closed: {}", e))),
                    (Ok(_), None) => Err(CrawlerError::Config(format!(
                        "No chain client configured for {}",
                        task.blockchain()
                    ))),
                    (Ok(_permit), Some(chain)) => run_task(task, chain, store).await,
                };

                RunReport {
                    id: task_id,
                    name: task_name,
                    started_at,
                    finished_at: chrono::Utc::now(),
                    result,
                }
            });
            handles.push((id, name, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (id, name, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    let now = chrono::Utc::now();
                    RunReport {
                        id,
                        name,
                        started_at: now,
                        finished_at: now,
                        result: Err(CrawlerError::Task(e.to_string())),
                    }
                }
            };

            match &report.result {
                Ok(summary) => info!(
                    "Task {} finished: {} labels over {} blocks",
                    report.name,
                    summary.labels_written(),
                    summary.blocks_processed
                ),
                Err(e) => error!("Task {} failed: {}", report.name, e),
            }
            reports.push(report);
        }

        reports
    }
}

async fn run_task(task: CrawlTask, chain: Arc<dyn ChainClient>, store: Arc<dyn LabelStore>) -> Result<CrawlSummary> {
    match task {
        CrawlTask::Generic(request) => GenericCrawler::new(chain, store).crawl(&request).await,
        CrawlTask::Events {
            jobs,
            from_block,
            to_block,
            batch_size,
            db_batch_size,
            ..
        } => {
            EventCrawler::new(chain, store)
                .crawl(&jobs, from_block, to_block, batch_size, db_batch_size)
                .await
        }
    }
}
