//! Live pipeline: persist each new head and run every transformer.
use std::sync::Arc;

use derive_more::Debug;
use eyre::{Context, Result};
use futures::future::join_all;
use primitives::headers::BlockHeader;
use store::HeaderStore;
use tracing::{debug, error};
use transformers::{EventTransformer, ExecuteSummary};

/// Execution context of the transformers for newly observed headers.
#[derive(Debug)]
pub struct Watcher {
    #[debug(skip)]
    store: Arc<dyn HeaderStore>,
    transformers: Vec<Arc<dyn EventTransformer>>,
}

impl Watcher {
    /// Create a watcher over the given transformers.
    pub fn new(store: Arc<dyn HeaderStore>, transformers: Vec<Arc<dyn EventTransformer>>) -> Self {
        Self { store, transformers }
    }

    /// Persist `header` and run every transformer over its missing headers.
    ///
    /// Transformers run concurrently; a failing transformer does not affect
    /// the others. Returns one summary per transformer that ran successfully.
    pub async fn handle_header(&self, header: &BlockHeader) -> Result<Vec<ExecuteSummary>> {
        self.store
            .create_or_update_header(header)
            .await
            .wrap_err_with(|| format!("persist header {}", header.number))?;

        let results = join_all(self.transformers.iter().map(|t| t.execute())).await;

        let mut summaries = Vec::with_capacity(results.len());
        for (transformer, result) in self.transformers.iter().zip(results) {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!(
                    transformer = transformer.kind().name(),
                    block_number = header.number,
                    err = ?e,
                    "Transformer execution failed"
                ),
            }
        }
        debug!(block_number = header.number, "Live header processed");
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::types::Log;
    use alloy_primitives::{Address, B256, BlockNumber, U256};
    use alloy_sol_types::SolEvent;
    use async_trait::async_trait;
    use chainio::IERC20::{Approval, Transfer};
    use extractor::ChainSource;
    use primitives::payload::Payload;
    use store::MemoryStore;
    use transformers::{
        ApprovalConverter, LogTransformer, TransferConverter, TransformerConfig,
        converter::{ERC20_APPROVALS, ERC20_TRANSFERS},
    };

    use super::*;
    use derive_more::Debug;

    #[derive(Debug)]
    struct OneTransferChain;

    #[async_trait]
    impl ChainSource for OneTransferChain {
        async fn latest_block_number(&self) -> Result<BlockNumber> {
            Ok(0)
        }

        async fn payload_at(&self, _: BlockNumber) -> Result<Payload> {
            eyre::bail!("unused")
        }

        async fn logs_at(&self, address: Address, topic0: B256, _: BlockNumber) -> Result<Vec<Log>> {
            if topic0 == Approval::SIGNATURE_HASH {
                eyre::bail!("connection reset");
            }
            let data = Transfer { from: Address::ZERO, to: address, value: U256::from(1) }
                .encode_log_data();
            Ok(vec![Log {
                inner: alloy_primitives::Log { address, data },
                transaction_index: Some(0),
                log_index: Some(0),
                ..Default::default()
            }])
        }
    }

    fn config(name: &str) -> TransformerConfig {
        TransformerConfig {
            name: name.to_owned(),
            contract_address: Address::repeat_byte(7),
            starting_block: 0,
            ending_block: None,
        }
    }

    #[tokio::test]
    async fn transformers_run_independently() {
        let store = Arc::new(MemoryStore::new());
        let chain: Arc<dyn ChainSource> = Arc::new(OneTransferChain);
        let transfer = LogTransformer::new(
            &config("erc20_transfer"),
            TransferConverter,
            Arc::clone(&store) as _,
            Arc::clone(&chain),
        )
        .unwrap();
        let approval = LogTransformer::new(
            &config("erc20_approval"),
            ApprovalConverter,
            Arc::clone(&store) as _,
            Arc::clone(&chain),
        )
        .unwrap();
        let transformers: Vec<Arc<dyn EventTransformer>> =
            vec![Arc::new(transfer), Arc::new(approval)];
        let watcher = Watcher::new(Arc::clone(&store) as _, transformers);

        let header =
            BlockHeader { number: 9, hash: B256::repeat_byte(9), parent_hash: B256::ZERO, timestamp: 9 };
        let summaries = watcher.handle_header(&header).await.unwrap();

        assert_eq!(summaries[0].checked, 1);
        assert_eq!(summaries[1].failed, 1);
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);
        assert!(store.records(ERC20_APPROVALS.name).is_empty());

        // a second head only re-runs the approval transformer's missing header
        let summaries = watcher.handle_header(&header).await.unwrap();
        assert_eq!(summaries[0], ExecuteSummary::default());
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);
    }
}
