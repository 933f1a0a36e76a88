//! Chainfill Extractor
use alloy::{
    primitives::{Address, B256, BlockNumber},
    providers::{Provider, ProviderBuilder},
    rpc::types::Log,
};
use alloy_rpc_client::ClientBuilder;
use alloy_rpc_types_eth::BlockNumberOrTag;
use async_trait::async_trait;
use chainio::{DefaultProvider, block_filter_at, event_filter_at};
use derive_more::Debug;
use eyre::{Context, Result, eyre};
use primitives::{
    headers::{BlockHeader, HeaderStream},
    payload::Payload,
    retries::{DEFAULT_RETRY_LAYER, RetryWsConnect},
};
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tracing::{debug, error, info, warn};
use url::Url;

/// Read access to the chain, as needed by the backfill and the transformers.
#[async_trait]
pub trait ChainSource: Send + Sync + std::fmt::Debug {
    /// Number of the latest block known to the node.
    async fn latest_block_number(&self) -> Result<BlockNumber>;

    /// Header and every log of the block at `height`.
    async fn payload_at(&self, height: BlockNumber) -> Result<Payload>;

    /// Logs of a single event emitted by `address` at `height`.
    async fn logs_at(&self, address: Address, topic0: B256, height: BlockNumber)
    -> Result<Vec<Log>>;
}

/// Extractor client
#[derive(Debug)]
pub struct Extractor {
    #[debug(skip)]
    provider: DefaultProvider,
}

impl Extractor {
    /// Create a new extractor connected over websocket.
    pub async fn new(rpc_url: Url) -> Result<Self> {
        let ws = RetryWsConnect::from_url(rpc_url);
        let client = ClientBuilder::default().layer(DEFAULT_RETRY_LAYER).pubsub(ws).await?;
        let provider = ProviderBuilder::new().connect_client(client);

        Ok(Self { provider })
    }

    /// Get a stream of block headers. This stream will attempt to automatically
    /// resubscribe and continue yielding headers in case of disconnections.
    pub async fn get_header_stream(&self) -> Result<HeaderStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            loop {
                info!("Attempting to subscribe to block headers...");
                let mut block_stream = match provider.subscribe_blocks().await {
                    Ok(sub) => {
                        info!("Successfully subscribed to block headers.");
                        sub.into_stream()
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to subscribe to blocks, retrying in 5s");
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                while let Some(block_data) = block_stream.next().await {
                    let header = BlockHeader {
                        number: block_data.number,
                        hash: block_data.hash,
                        parent_hash: block_data.parent_hash,
                        timestamp: block_data.timestamp,
                    };
                    if tx.send(header).is_err() {
                        error!("Header receiver dropped. Stopping header task.");
                        return;
                    }
                }
                warn!("Block stream ended. Attempting to resubscribe...");
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn header_at(&self, height: BlockNumber) -> Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .wrap_err_with(|| format!("get_block_by_number({height}) failed"))?
            .ok_or_else(|| eyre!("block {height} not found"))?;

        Ok(BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
        })
    }
}

#[async_trait]
impl ChainSource for Extractor {
    async fn latest_block_number(&self) -> Result<BlockNumber> {
        self.provider.get_block_number().await.wrap_err("get_block_number failed")
    }

    async fn payload_at(&self, height: BlockNumber) -> Result<Payload> {
        let header = self.header_at(height).await?;
        let logs = self
            .provider
            .get_logs(&block_filter_at(height))
            .await
            .wrap_err_with(|| format!("get_logs({height}) failed"))?;

        // A reorg between the two calls would pair logs with the wrong header.
        if let Some(log) = logs.iter().find(|log| log.block_hash.is_some_and(|h| h != header.hash))
        {
            return Err(eyre!(
                "logs at {height} belong to block {:?}, header is {}",
                log.block_hash,
                header.hash
            ));
        }

        debug!(height, logs = logs.len(), "Fetched payload");
        Ok(Payload::new(header, logs))
    }

    async fn logs_at(
        &self,
        address: Address,
        topic0: B256,
        height: BlockNumber,
    ) -> Result<Vec<Log>> {
        self.provider
            .get_logs(&event_filter_at(address, topic0, height))
            .await
            .wrap_err_with(|| format!("get_logs({address}, {height}) failed"))
    }
}
