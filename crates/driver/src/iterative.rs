//! Batch transformation of fetched payloads.
use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Debug;
use eyre::{Context, Report, Result};
use primitives::payload::Payload;
use store::HeaderStore;
use tracing::debug;
use transformers::EventTransformer;

/// Heights committed by one batch, and the error that stopped it, if any.
#[derive(Debug, Default)]
pub struct TransformOutcome {
    /// Heights committed, in commit order
    pub committed: Vec<u64>,
    /// Error that stopped the batch before its last height
    pub error: Option<Report>,
}

impl TransformOutcome {
    /// Discard the committed heights of a failed batch.
    pub fn into_result(self) -> Result<Vec<u64>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.committed),
        }
    }
}

/// Applies domain transformation and persistence to a batch of payloads.
#[async_trait]
pub trait IterativeTransformer: Send + Sync + std::fmt::Debug {
    /// Process payloads in ascending height order. An error stops the batch;
    /// heights before it stay committed and are still reported.
    async fn transform(&self, payloads: Vec<Payload>) -> TransformOutcome;
}

/// Persists each payload's header, then runs every transformer on its logs.
#[derive(Debug)]
pub struct BlockTransformer {
    #[debug(skip)]
    store: Arc<dyn HeaderStore>,
    transformers: Vec<Arc<dyn EventTransformer>>,
}

impl BlockTransformer {
    /// Create a block transformer.
    pub fn new(store: Arc<dyn HeaderStore>, transformers: Vec<Arc<dyn EventTransformer>>) -> Self {
        Self { store, transformers }
    }

    async fn transform_one(&self, payload: &Payload) -> Result<()> {
        let header = self.store.create_or_update_header(&payload.header).await?;
        for transformer in &self.transformers {
            let outcome = transformer
                .process_payload(&header, &payload.logs)
                .await
                .wrap_err_with(|| format!("transformer {}", transformer.kind().name()))?;
            debug!(
                block_number = header.block_number,
                transformer = transformer.kind().name(),
                ?outcome,
                "Processed payload"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl IterativeTransformer for BlockTransformer {
    async fn transform(&self, mut payloads: Vec<Payload>) -> TransformOutcome {
        payloads.sort_by_key(Payload::block_number);

        let mut outcome =
            TransformOutcome { committed: Vec::with_capacity(payloads.len()), error: None };
        for payload in &payloads {
            let height = payload.block_number();
            if let Err(e) = self.transform_one(payload).await {
                outcome.error = Some(e.wrap_err(format!("transform height {height}")));
                break;
            }
            outcome.committed.push(height);
        }
        outcome
    }
}
