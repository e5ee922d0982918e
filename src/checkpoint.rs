use std::sync::Arc;

use tracing::info;

use crate::blockchain::Blockchain;
use crate::error::Result;
use crate::store::LabelStore;

/// Block a run labeled `label_name` should continue from: `from_block` when
/// nothing in `[from_block, to_block]` is labeled yet, otherwise one past the
/// highest labeled block.
pub async fn resume_point(
    store: &dyn LabelStore,
    blockchain: Blockchain,
    label_name: &str,
    from_block: u64,
    to_block: u64,
) -> Result<u64> {
    let resume = match store
        .max_labeled_block(blockchain, label_name, from_block, to_block)
        .await?
    {
        Some(max) => max + 1,
        None => from_block,
    };

    if resume != from_block {
        info!("Resuming {} on {} from block {}", label_name, blockchain, resume);
    }
    Ok(resume)
}

pub struct CheckpointResolver {
    store: Arc<dyn LabelStore>,
    blockchain: Blockchain,
}

impl CheckpointResolver {
    pub fn new(store: Arc<dyn LabelStore>, blockchain: Blockchain) -> Self {
        Self { store, blockchain }
    }

    pub async fn resume_point(&self, label_name: &str, from_block: u64, to_block: u64) -> Result<u64> {
        resume_point(self.store.as_ref(), self.blockchain, label_name, from_block, to_block).await
    }
}
