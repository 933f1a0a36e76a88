//! Bounded-concurrency payload retrieval.
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use derive_more::Debug;
use extractor::ChainSource;
use eyre::{Context, Result, eyre};
use futures::{StreamExt, TryStreamExt, stream};
use primitives::{
    payload::Payload,
    retries::{is_connection_refused, retry_with_backoff_if},
};
use tracing::debug;

/// Retrieves raw payloads for a set of heights.
#[async_trait]
pub trait PayloadFetcher: Send + Sync + std::fmt::Debug {
    /// One payload per requested height, or an error if any height failed.
    async fn fetch_at(&self, heights: &[u64]) -> Result<HashMap<u64, Payload>>;
}

/// [`PayloadFetcher`] reading from a [`ChainSource`] with at most `workers`
/// requests in flight.
#[derive(Debug)]
pub struct ChainPayloadFetcher {
    #[debug(skip)]
    chain: Arc<dyn ChainSource>,
    workers: NonZeroUsize,
}

impl ChainPayloadFetcher {
    /// Create a fetcher.
    pub const fn new(chain: Arc<dyn ChainSource>, workers: NonZeroUsize) -> Self {
        Self { chain, workers }
    }

    async fn fetch_one(chain: Arc<dyn ChainSource>, height: u64) -> Result<(u64, Payload)> {
        let payload = retry_with_backoff_if(
            || chain.payload_at(height),
            |e: &eyre::Report| is_connection_refused(format!("{e:#}")),
        )
        .await
        .wrap_err_with(|| format!("fetch payload at height {height}"))?;

        if payload.block_number() != height {
            return Err(eyre!(
                "chain source returned block {} for height {height}",
                payload.block_number()
            ));
        }
        Ok((height, payload))
    }
}

#[async_trait]
impl PayloadFetcher for ChainPayloadFetcher {
    async fn fetch_at(&self, heights: &[u64]) -> Result<HashMap<u64, Payload>> {
        // First error drops the remaining in-flight requests.
        let payloads: HashMap<u64, Payload> = stream::iter(heights.iter().copied())
            .map(|height| Self::fetch_one(Arc::clone(&self.chain), height))
            .buffer_unordered(self.workers.get())
            .try_collect()
            .await?;

        debug!(requested = heights.len(), fetched = payloads.len(), "Fetched batch");
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use alloy_primitives::{Address, B256, BlockNumber};
    use primitives::headers::BlockHeader;

    use super::*;
    use derive_more::Debug;

    #[derive(Debug, Default)]
    struct SlowChain {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        refuse_once: Mutex<HashSet<u64>>,
        missing: HashSet<u64>,
    }

    #[async_trait]
    impl ChainSource for SlowChain {
        async fn latest_block_number(&self) -> Result<BlockNumber> {
            Ok(0)
        }

        async fn payload_at(&self, height: BlockNumber) -> Result<Payload> {
            if self.refuse_once.lock().unwrap().remove(&height) {
                eyre::bail!("IO error: Connection refused (os error 111)");
            }
            if self.missing.contains(&height) {
                eyre::bail!("block {height} not found");
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let header = BlockHeader {
                number: height,
                hash: B256::with_last_byte(height as u8),
                parent_hash: B256::ZERO,
                timestamp: height,
            };
            Ok(Payload::new(header, vec![]))
        }

        async fn logs_at(
            &self,
            _: Address,
            _: B256,
            _: BlockNumber,
        ) -> Result<Vec<alloy::rpc::types::Log>> {
            Ok(vec![])
        }
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_worker_count() {
        let chain = Arc::new(SlowChain::default());
        let fetcher = ChainPayloadFetcher::new(Arc::clone(&chain) as _, workers(3));

        let heights: Vec<u64> = (100..120).collect();
        let payloads = fetcher.fetch_at(&heights).await.unwrap();

        assert_eq!(payloads.len(), heights.len());
        assert!(heights.iter().all(|h| payloads[h].block_number() == *h));
        assert_eq!(chain.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn any_failed_height_fails_the_batch() {
        let chain = SlowChain { missing: HashSet::from([101]), ..Default::default() };
        let fetcher = ChainPayloadFetcher::new(Arc::new(chain), workers(2));

        let err = fetcher.fetch_at(&[100, 101, 102]).await.unwrap_err();
        assert!(format!("{err:#}").contains("fetch payload at height 101"));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_refused_is_retried() {
        let chain = SlowChain { refuse_once: Mutex::new(HashSet::from([7])), ..Default::default() };
        let fetcher = ChainPayloadFetcher::new(Arc::new(chain), workers(1));

        let payloads = fetcher.fetch_at(&[7]).await.unwrap();
        assert_eq!(payloads[&7].block_number(), 7);
    }
}
