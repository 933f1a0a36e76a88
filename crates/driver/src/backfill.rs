//! Periodic gap detection and backfill.
//!
//! Every tick recomputes the gaps from the store, splits each gap into batches
//! of at most `batch_size` heights, fetches a batch with bounded concurrency
//! and hands it to the iterative transformer. Errors abort the current gap
//! only; the next tick starts from scratch.
use std::{num::NonZeroU64, sync::Arc, time::Duration};

use config::BackfillOpts;
use derive_more::Debug;
use eyre::{Context, Result, bail, eyre};
use primitives::{gaps::DBGap, payload::Payload};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    fetcher::PayloadFetcher, gap_retriever::GapRetriever, iterative::IterativeTransformer,
};

/// Settings of the [`BackfillService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Time between two gap checks
    pub gap_check_frequency: Duration,
    /// Maximum heights per fetch/transform batch
    pub batch_size: u64,
    /// Maximum concurrent chain requests
    pub workers: usize,
    /// Lowest tracked height
    pub starting_block: u64,
}

impl BackfillConfig {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.gap_check_frequency.is_zero() {
            bail!("gap check frequency must be greater than zero");
        }
        if self.batch_size == 0 {
            bail!("backfill batch size must be greater than zero");
        }
        if self.workers == 0 {
            bail!("backfill worker count must be greater than zero");
        }
        Ok(())
    }
}

impl From<&BackfillOpts> for BackfillConfig {
    fn from(opts: &BackfillOpts) -> Self {
        Self {
            gap_check_frequency: opts.gap_check_frequency(),
            batch_size: opts.batch_size,
            workers: opts.workers,
            starting_block: opts.starting_block,
        }
    }
}

/// Outcome of one backfill cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Gaps reported at the start of the cycle
    pub gaps: Vec<DBGap>,
    /// Heights committed during the cycle, in commit order
    pub committed: Vec<u64>,
    /// Gaps abandoned because of a fetch or transform error
    pub failed_gaps: usize,
}

/// Background service that fills the gaps reported by a [`GapRetriever`].
#[derive(Debug)]
pub struct BackfillService {
    retriever: Arc<dyn GapRetriever>,
    fetcher: Arc<dyn PayloadFetcher>,
    transformer: Arc<dyn IterativeTransformer>,
    gap_check_frequency: Duration,
    batch_size: NonZeroU64,
    #[debug(skip)]
    quit: CancellationToken,
}

impl BackfillService {
    /// Create a service, failing on an invalid configuration.
    pub fn new(
        retriever: Arc<dyn GapRetriever>,
        fetcher: Arc<dyn PayloadFetcher>,
        transformer: Arc<dyn IterativeTransformer>,
        config: &BackfillConfig,
    ) -> Result<Self> {
        config.validate()?;
        let batch_size =
            NonZeroU64::new(config.batch_size).ok_or_else(|| eyre!("batch size is zero"))?;

        Ok(Self {
            retriever,
            fetcher,
            transformer,
            gap_check_frequency: config.gap_check_frequency,
            batch_size,
            quit: CancellationToken::new(),
        })
    }

    /// Token that stops the service when cancelled.
    ///
    /// The running cycle finishes its current batch; no new batch or tick starts.
    pub fn quit_handle(&self) -> CancellationToken {
        self.quit.clone()
    }

    /// Start the periodic loop on `tracker`. The first cycle runs immediately.
    pub fn sync(self, tracker: &TaskTracker) -> JoinHandle<()> {
        tracker.spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(
            first_block = self.retriever.retrieve_first_block(),
            frequency = ?self.gap_check_frequency,
            batch_size = self.batch_size.get(),
            "Starting backfill service"
        );

        let mut ticker = interval(self.gap_check_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.quit.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(report) if report.gaps.is_empty() => {}
                Ok(report) => info!(
                    gaps = report.gaps.len(),
                    committed = report.committed.len(),
                    failed_gaps = report.failed_gaps,
                    "Backfill cycle completed"
                ),
                Err(e) => error!(err = ?e, "Backfill cycle failed"),
            }
        }

        info!("Backfill service stopped");
    }

    /// Run one cycle: retrieve the gaps and process them in order.
    ///
    /// Only the gap retrieval itself can fail the cycle; per-gap errors are
    /// logged and counted in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let gaps = self.retriever.retrieve_gaps().await.wrap_err("retrieve gaps")?;
        let mut report = CycleReport { gaps, ..Default::default() };

        for gap in report.gaps.clone() {
            if self.quit.is_cancelled() {
                break;
            }
            info!(%gap, "Backfilling gap");
            if let Err(e) = self.backfill_gap(gap, &mut report.committed).await {
                error!(%gap, err = ?e, "Backfill of gap aborted");
                report.failed_gaps += 1;
            }
        }
        Ok(report)
    }

    async fn backfill_gap(&self, gap: DBGap, committed: &mut Vec<u64>) -> Result<()> {
        for batch in gap.batches(self.batch_size) {
            if self.quit.is_cancelled() {
                warn!(%gap, next = ?batch.first(), "Backfill cancelled before completing gap");
                return Ok(());
            }

            let mut fetched = self.fetcher.fetch_at(&batch).await?;
            let payloads = batch
                .iter()
                .map(|height| {
                    fetched
                        .remove(height)
                        .ok_or_else(|| eyre!("fetcher returned no payload for height {height}"))
                })
                .collect::<Result<Vec<Payload>>>()?;

            let outcome = self.transformer.transform(payloads).await;
            committed.extend(outcome.committed);
            if let Some(e) = outcome.error {
                return Err(e);
            }
        }
        Ok(())
    }
}
