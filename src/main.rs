use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use label_crawler::abi::{find_event, load_abi, load_event_abis};
use label_crawler::chain::rpc::RpcChainClient;
use label_crawler::config::{parse_addresses, AppCfg, EventJobCfg, JobCfg};
use label_crawler::store::postgres::PgStore;
use label_crawler::{
    resume_point, Blockchain, ChainClient, CrawlJob, CrawlRequest, CrawlRunner, CrawlTask, LabelStore,
};

async fn latest_block(chains: &HashMap<Blockchain, Arc<dyn ChainClient>>, blockchain: Blockchain) -> anyhow::Result<u64> {
    let chain = chains
        .get(&blockchain)
        .ok_or_else(|| anyhow::anyhow!("No chain client for {}", blockchain))?;
    Ok(chain.get_latest_block_number().await?)
}

async fn generic_task(
    job: &JobCfg,
    cfg: &AppCfg,
    chains: &HashMap<Blockchain, Arc<dyn ChainClient>>,
    store: &dyn LabelStore,
) -> anyhow::Result<Option<CrawlTask>> {
    let to_block = match job.to_block {
        Some(to_block) => to_block,
        None => latest_block(chains, job.blockchain).await?,
    };
    let from_block = resume_point(store, job.blockchain, &job.label_name, job.from_block, to_block).await?;
    if from_block > to_block {
        info!("{} on {} is up to date at block {}", job.label_name, job.blockchain, to_block);
        return Ok(None);
    }

    let mut secondary_abis = Vec::new();
    for path in &job.secondary_abi_paths {
        secondary_abis.extend(load_event_abis(path)?);
    }
    let addresses = parse_addresses(&job.addresses)?;

    Ok(Some(CrawlTask::Generic(CrawlRequest {
        blockchain: job.blockchain,
        label_name: job.label_name.clone(),
        primary_abi: load_abi(&job.abi_path)?,
        secondary_abis,
        from_block,
        to_block,
        addresses: (!addresses.is_empty()).then_some(addresses),
        batch_size: job.batch_size.unwrap_or(cfg.crawler.batch_size),
    })))
}

/// Event jobs are grouped per chain into one run; each job keeps its own
/// range from its checkpoint to its `to_block`.
async fn event_tasks(
    cfg: &AppCfg,
    chains: &HashMap<Blockchain, Arc<dyn ChainClient>>,
    store: &dyn LabelStore,
) -> anyhow::Result<Vec<CrawlTask>> {
    let mut grouped: HashMap<Blockchain, Vec<&EventJobCfg>> = HashMap::new();
    for job in &cfg.event_jobs {
        grouped.entry(job.blockchain).or_default().push(job);
    }

    let mut tasks = Vec::new();
    for (blockchain, jobs) in grouped {
        let latest = latest_block(chains, blockchain).await?;

        let mut crawl_jobs = Vec::with_capacity(jobs.len());
        for job in jobs {
            let to_block = job.to_block.unwrap_or(latest);
            let resume = resume_point(store, blockchain, &job.label_name, job.from_block, to_block).await?;
            if resume > to_block {
                info!("{} {} on {} is up to date at block {}", job.label_name, job.event_name, blockchain, to_block);
                continue;
            }
            let event_abi = find_event(&load_abi(&job.abi_path)?, &job.event_name)?;
            crawl_jobs.push(
                CrawlJob::new(event_abi, parse_addresses(&job.addresses)?, job.label_name.clone())
                    .with_range(resume, to_block),
            );
        }

        tasks.extend(CrawlTask::events(
            blockchain,
            crawl_jobs,
            cfg.crawler.batch_size,
            cfg.crawler.db_block_query_batch,
        ));
    }

    Ok(tasks)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let cfg_path = std::env::args().nth(1).unwrap_or_else(|| "./config.yaml".to_string());
    let cfg = AppCfg::load(&cfg_path)?;

    let db_schema = cfg.postgres.schema.as_ref().map(std::fs::read_to_string).transpose()?;

    // deps
    let store: Arc<dyn LabelStore> = Arc::new(
        PgStore::connect(
            &cfg.postgres.dsn,
            db_schema.as_deref(),
            cfg.postgres.pool_size(cfg.crawler.workers),
            cfg.postgres.statement_timeout(),
        )
        .await?,
    );

    let mut chains: HashMap<Blockchain, Arc<dyn ChainClient>> = HashMap::new();
    for (blockchain, chain_cfg) in &cfg.chains {
        let client = RpcChainClient::new(*blockchain, &chain_cfg.http_rpc_url, chain_cfg.timeout())?;
        chains.insert(*blockchain, Arc::new(client));
    }

    let mut tasks = Vec::new();
    for job in &cfg.jobs {
        if let Some(task) = generic_task(job, &cfg, &chains, store.as_ref()).await? {
            tasks.push(task);
        }
    }
    tasks.extend(event_tasks(&cfg, &chains, store.as_ref()).await?);

    if tasks.is_empty() {
        info!("Nothing to crawl");
        return Ok(());
    }

    let mut runner = CrawlRunner::new(cfg.crawler.workers, store.clone());
    for chain in chains.values() {
        runner = runner.with_chain(chain.clone());
    }

    let reports = runner.run_all(tasks).await;
    let failed: Vec<_> = reports.iter().filter(|report| !report.is_success()).collect();
    for report in &failed {
        warn!("Task {} ({}) failed, rerun to resume from its checkpoint", report.name, report.id);
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} crawl tasks failed", failed.len(), reports.len());
    }

    info!("All {} crawl tasks finished", reports.len());
    Ok(())
}
