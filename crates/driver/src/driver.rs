//! Chainfill Driver - wires the backfill service and the live pipeline

use std::{future::Future, num::NonZeroUsize, pin::pin, sync::Arc, time::Duration};

use config::{Opts, TransformerOpts};
use extractor::{ChainSource, Extractor};
use eyre::{Context, Result, eyre};
use primitives::headers::HeaderStream;
use runtime::shutdown::{graceful_shutdown, run_until_shutdown};
use store::{HeaderStore, PgStore, TransformerKind};
use tokio_stream::StreamExt;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use transformers::{TransformerConfig, TransformerContext, TransformerRegistry};

use crate::{
    backfill::{BackfillConfig, BackfillService},
    fetcher::ChainPayloadFetcher,
    gap_retriever::StoreGapRetriever,
    iterative::BlockTransformer,
    subscription::subscribe_with_retry,
    watcher::Watcher,
};

/// Build one transformer configuration per selected name.
pub fn transformer_configs(opts: &TransformerOpts) -> Vec<TransformerConfig> {
    opts.transformers
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| TransformerConfig {
            name: name.to_owned(),
            contract_address: opts.contract_address,
            starting_block: opts.starting_block,
            ending_block: opts.ending_block,
        })
        .collect()
}

/// Driver that runs the backfill service next to the live pipeline
#[derive(Debug)]
pub struct Driver {
    extractor: Arc<Extractor>,
    store: PgStore,
    watcher: Watcher,
    backfill: Option<BackfillService>,
    enable_live: bool,
    shutdown_timeout: Duration,
}

impl Driver {
    /// Create a new driver with the given configuration
    pub async fn new(opts: Opts) -> Result<Self> {
        info!("Initializing driver");

        let backfill_config = BackfillConfig::from(&opts.backfill);
        backfill_config.validate().wrap_err("invalid backfill configuration")?;
        let configs = transformer_configs(&opts.transformers);
        if configs.is_empty() {
            return Err(eyre!("no transformers configured"));
        }

        let store = PgStore::connect(&opts.database.url, opts.database.max_connections).await?;
        let extractor = Arc::new(Extractor::new(opts.rpc.url.clone()).await.wrap_err(
            "Failed to initialize chain extractor. Ensure the RPC URL is a WebSocket endpoint (ws:// or wss://)",
        )?);

        let shared_store: Arc<dyn HeaderStore> = Arc::new(store.clone());
        let chain: Arc<dyn ChainSource> = Arc::clone(&extractor) as _;
        let ctx =
            TransformerContext { store: Arc::clone(&shared_store), chain: Arc::clone(&chain) };
        let transformers = TransformerRegistry::with_defaults().build(&configs, &ctx)?;
        let kinds: Vec<TransformerKind> = transformers.iter().map(|t| t.kind().clone()).collect();

        if opts.skip_migrations {
            info!("Skipping database migrations");
        } else {
            info!("Running database migrations...");
            store.init_db(opts.reset_db, &kinds).await?;
            for kind in &kinds {
                shared_store.register_transformer(kind).await?;
            }
            info!("Database migrations completed");
        }

        let backfill = if opts.backfill.disable_backfill {
            info!("Backfill disabled via configuration");
            None
        } else {
            let mut retriever = StoreGapRetriever::new(
                Arc::clone(&shared_store),
                kinds,
                backfill_config.starting_block,
            );
            if opts.backfill.follow_chain_head {
                retriever = retriever.follow_chain_head(
                    Arc::clone(&chain),
                    opts.backfill.finalization_buffer_blocks,
                );
            }
            let workers = NonZeroUsize::new(backfill_config.workers)
                .ok_or_else(|| eyre!("backfill worker count must be greater than zero"))?;
            let fetcher = ChainPayloadFetcher::new(Arc::clone(&chain), workers);
            let block_transformer =
                BlockTransformer::new(Arc::clone(&shared_store), transformers.clone());

            Some(BackfillService::new(
                Arc::new(retriever),
                Arc::new(fetcher),
                Arc::new(block_transformer),
                &backfill_config,
            )?)
        };

        Ok(Self {
            extractor,
            store,
            watcher: Watcher::new(shared_store, transformers),
            backfill,
            enable_live: !opts.disable_live,
            shutdown_timeout: opts.shutdown_timeout(),
        })
    }

    async fn get_headers(extractor: &Extractor) -> HeaderStream {
        subscribe_with_retry(|| extractor.get_header_stream(), "headers").await
    }

    /// Run until `shutdown` resolves, then stop the backfill and close the pool.
    pub async fn start_with_shutdown(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting driver");
        let mut shutdown = pin!(shutdown);

        let tracker = TaskTracker::new();
        let quit = match &self.backfill {
            Some(backfill) => backfill.quit_handle(),
            None => CancellationToken::new(),
        };
        let Self { extractor, store, watcher, backfill, enable_live, shutdown_timeout } = self;
        if let Some(backfill) = backfill {
            backfill.sync(&tracker);
        }

        if enable_live {
            run_until_shutdown(Self::live_loop(&extractor, &watcher), &mut shutdown).await;
        } else {
            info!("Live pipeline disabled via configuration");
            shutdown.await;
        }
        info!("Received shutdown signal, stopping driver");

        if !graceful_shutdown(&quit, &tracker, shutdown_timeout).await {
            error!("Backfill did not stop in time");
        }
        store.close().await;
        Ok(())
    }

    async fn live_loop(extractor: &Extractor, watcher: &Watcher) {
        let mut headers = Self::get_headers(extractor).await;

        loop {
            match headers.next().await {
                Some(header) => {
                    info!(block_number = header.number, hash = %header.hash, "Processing header");
                    if let Err(e) = watcher.handle_header(&header).await {
                        error!(err = ?e, "Failed to process header");
                    }
                }
                None => {
                    warn!("Header stream ended; re-subscribing…");
                    headers = Self::get_headers(extractor).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;

    use super::*;

    #[test]
    fn configs_follow_selected_names() {
        let opts = TransformerOpts {
            transformers: vec!["erc20_transfer".into(), " erc20_approval ".into(), String::new()],
            contract_address: Address::repeat_byte(1),
            starting_block: 10,
            ending_block: Some(20),
        };

        let configs = transformer_configs(&opts);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].name, "erc20_approval");
        assert!(configs.iter().all(|c| c.starting_block == 10 && c.ending_block == Some(20)));
    }
}
