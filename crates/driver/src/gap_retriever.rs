//! Missing-range detection against the persistent store.
use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Debug;
use extractor::ChainSource;
use eyre::{Context, Result};
use primitives::gaps::DBGap;
use store::{HeaderStore, TransformerKind};
use tracing::debug;

/// Computes which height ranges still need to be backfilled.
#[async_trait]
pub trait GapRetriever: Send + Sync + std::fmt::Debug {
    /// Lowest height the system tracks.
    fn retrieve_first_block(&self) -> u64;

    /// Ordered, non-overlapping missing ranges between the first block and the head.
    async fn retrieve_gaps(&self) -> Result<Vec<DBGap>>;
}

/// [`GapRetriever`] backed by a [`HeaderStore`].
///
/// A height is complete once it has a header row and every transformer
/// covering it has committed its checked marker. The head is the highest
/// stored header, or the chain head minus a finalization buffer when following
/// the chain, whichever is higher.
#[derive(Debug)]
pub struct StoreGapRetriever {
    starting_block: u64,
    kinds: Vec<TransformerKind>,
    #[debug(skip)]
    store: Arc<dyn HeaderStore>,
    #[debug(skip)]
    chain_head: Option<(Arc<dyn ChainSource>, u64)>,
}

impl StoreGapRetriever {
    /// Create a retriever bounded by the store head only.
    pub fn new(store: Arc<dyn HeaderStore>, kinds: Vec<TransformerKind>, starting_block: u64) -> Self {
        Self { starting_block, kinds, store, chain_head: None }
    }

    /// Also consider the chain head, excluding the last `finalization_buffer` heights.
    pub fn follow_chain_head(mut self, chain: Arc<dyn ChainSource>, finalization_buffer: u64) -> Self {
        self.chain_head = Some((chain, finalization_buffer));
        self
    }

    async fn head(&self) -> Result<Option<u64>> {
        let stored = self.store.latest_header_number().await.wrap_err("read store head")?;
        let Some((chain, buffer)) = &self.chain_head else {
            return Ok(stored);
        };

        let latest = chain.latest_block_number().await.wrap_err("read chain head")?;
        let chain_head = latest.checked_sub(*buffer);
        Ok(stored.max(chain_head))
    }
}

#[async_trait]
impl GapRetriever for StoreGapRetriever {
    fn retrieve_first_block(&self) -> u64 {
        self.starting_block
    }

    async fn retrieve_gaps(&self) -> Result<Vec<DBGap>> {
        let start = self.retrieve_first_block();
        let head = match self.head().await? {
            Some(head) if head >= start => head,
            // nothing observed yet, or the configured start is above the head
            _ => return Ok(Vec::new()),
        };

        let gaps = self.store.incomplete_ranges(start, head, &self.kinds).await?;
        debug!(start, head, gaps = gaps.len(), "Retrieved gaps");
        Ok(gaps)
    }
}
