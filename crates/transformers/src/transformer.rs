//! The checked-header protocol shared by every event transformer.
use std::sync::Arc;

use alloy::rpc::types::Log;
use alloy_primitives::Address;
use async_trait::async_trait;
use derive_more::Debug;
use extractor::ChainSource;
use eyre::{Context, Result};
use primitives::headers::Header;
use store::{EventRecord, HeaderStore, PersistOutcome, TransformerKind};
use tracing::{debug, info, warn};

use crate::converter::LogConverter;

/// Settings of one configured transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerConfig {
    /// Registry name, also used for the checked column
    pub name: String,
    /// Contract whose logs are transformed
    pub contract_address: Address,
    /// First height to process
    pub starting_block: u64,
    /// Last height to process, unbounded if `None`
    pub ending_block: Option<u64>,
}

/// Counts from one [`EventTransformer::execute`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    /// Headers committed by this run
    pub checked: usize,
    /// Headers another writer committed first
    pub skipped: usize,
    /// Headers that failed and stay unchecked
    pub failed: usize,
}

/// MissingHeaders, FetchLogs, Convert and Persist+MarkChecked for one event kind.
#[async_trait]
pub trait EventTransformer: Send + Sync + std::fmt::Debug {
    /// Identity inside the store.
    fn kind(&self) -> &TransformerKind;

    /// Headers in range this transformer has not checked yet.
    async fn missing_headers(&self) -> Result<Vec<Header>>;

    /// Logs this transformer cares about at the header's height.
    async fn fetch_logs(&self, header: &Header) -> Result<Vec<Log>>;

    /// Decode logs into result rows.
    fn convert(&self, logs: &[Log]) -> Result<Vec<EventRecord>>;

    /// Insert rows and mark the header checked in one transaction.
    async fn persist(&self, header: &Header, records: &[EventRecord]) -> Result<PersistOutcome>;

    /// Run the protocol for a header whose logs were already fetched.
    ///
    /// Logs not matching the transformer's contract and event are ignored.
    /// Returns `None` when the header is outside the transformer's range.
    async fn process_payload(
        &self,
        header: &Header,
        logs: &[Log],
    ) -> Result<Option<PersistOutcome>>;

    /// Process every missing header. Failures are logged per header and do
    /// not stop the remaining ones.
    async fn execute(&self) -> Result<ExecuteSummary> {
        let missing = self.missing_headers().await?;
        let mut summary = ExecuteSummary::default();

        for header in &missing {
            let result: Result<PersistOutcome> = async {
                let logs = self.fetch_logs(header).await?;
                let records = self.convert(&logs)?;
                self.persist(header, &records).await
            }
            .await;

            match result {
                Ok(PersistOutcome::Committed) => summary.checked += 1,
                Ok(PersistOutcome::AlreadyChecked) => summary.skipped += 1,
                Err(e) => {
                    warn!(
                        transformer = self.kind().name(),
                        block_number = header.block_number,
                        err = ?e,
                        "Failed to transform header"
                    );
                    summary.failed += 1;
                }
            }
        }

        if !missing.is_empty() {
            info!(
                transformer = self.kind().name(),
                checked = summary.checked,
                skipped = summary.skipped,
                failed = summary.failed,
                "Transformer run finished"
            );
        }
        Ok(summary)
    }
}

/// [`EventTransformer`] for contracts whose events decode with a [`LogConverter`].
#[derive(Debug)]
pub struct LogTransformer<C> {
    kind: TransformerKind,
    contract_address: Address,
    converter: C,
    #[debug(skip)]
    store: Arc<dyn HeaderStore>,
    #[debug(skip)]
    chain: Arc<dyn ChainSource>,
}

impl<C: LogConverter> LogTransformer<C> {
    /// Create a transformer, validating its name and range.
    pub fn new(
        config: &TransformerConfig,
        converter: C,
        store: Arc<dyn HeaderStore>,
        chain: Arc<dyn ChainSource>,
    ) -> Result<Self> {
        let kind = TransformerKind::new(
            &config.name,
            converter.table(),
            config.starting_block,
            config.ending_block,
        )?;
        Ok(Self { kind, contract_address: config.contract_address, converter, store, chain })
    }

    fn matches(&self, log: &Log) -> bool {
        log.address() == self.contract_address &&
            log.topic0() == Some(&self.converter.event_signature())
    }
}

#[async_trait]
impl<C: LogConverter> EventTransformer for LogTransformer<C> {
    fn kind(&self) -> &TransformerKind {
        &self.kind
    }

    async fn missing_headers(&self) -> Result<Vec<Header>> {
        self.store.missing_headers(&self.kind).await
    }

    async fn fetch_logs(&self, header: &Header) -> Result<Vec<Log>> {
        self.chain
            .logs_at(self.contract_address, self.converter.event_signature(), header.block_number)
            .await
            .wrap_err_with(|| format!("fetch logs at height {}", header.block_number))
    }

    fn convert(&self, logs: &[Log]) -> Result<Vec<EventRecord>> {
        logs.iter().map(|log| self.converter.to_record(log)).collect()
    }

    async fn persist(&self, header: &Header, records: &[EventRecord]) -> Result<PersistOutcome> {
        let outcome = self.store.persist_checked(header.id, &self.kind, records).await?;
        if outcome == PersistOutcome::AlreadyChecked {
            debug!(
                transformer = self.kind.name(),
                block_number = header.block_number,
                "Header already checked"
            );
        }
        Ok(outcome)
    }

    async fn process_payload(
        &self,
        header: &Header,
        logs: &[Log],
    ) -> Result<Option<PersistOutcome>> {
        if !self.kind.covers(header.block_number) {
            return Ok(None);
        }
        let matching: Vec<Log> = logs.iter().filter(|log| self.matches(log)).cloned().collect();
        let records = self.convert(&matching).wrap_err_with(|| {
            format!("{} at height {}", self.kind.name(), header.block_number)
        })?;
        self.persist(header, &records).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use alloy::primitives::{B256, BlockNumber, U256};
    use primitives::{headers::BlockHeader, payload::Payload};
    use store::MemoryStore;

    use super::*;
    use derive_more::Debug;
    use crate::converter::{ERC20_TRANSFERS, TransferConverter, test_utils::transfer_log};

    #[derive(Debug, Default)]
    struct MockChain {
        logs: HashMap<BlockNumber, Vec<Log>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainSource for MockChain {
        async fn latest_block_number(&self) -> Result<BlockNumber> {
            Ok(self.logs.keys().copied().max().unwrap_or_default())
        }

        async fn payload_at(&self, height: BlockNumber) -> Result<Payload> {
            Ok(Payload::new(block(height), self.logs.get(&height).cloned().unwrap_or_default()))
        }

        async fn logs_at(
            &self,
            _address: Address,
            _topic0: B256,
            height: BlockNumber,
        ) -> Result<Vec<Log>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.logs.get(&height).cloned().unwrap_or_default())
        }
    }

    fn contract() -> Address {
        Address::repeat_byte(0x42)
    }

    fn block(number: u64) -> BlockHeader {
        BlockHeader {
            number,
            hash: B256::with_last_byte(number as u8),
            parent_hash: B256::ZERO,
            timestamp: number,
        }
    }

    fn config(starting_block: u64, ending_block: Option<u64>) -> TransformerConfig {
        TransformerConfig {
            name: "erc20_transfer".into(),
            contract_address: contract(),
            starting_block,
            ending_block,
        }
    }

    fn setup(
        chain: MockChain,
        starting_block: u64,
        ending_block: Option<u64>,
    ) -> (Arc<MemoryStore>, Arc<MockChain>, LogTransformer<TransferConverter>) {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(chain);
        let transformer = LogTransformer::new(
            &config(starting_block, ending_block),
            TransferConverter,
            Arc::clone(&store) as Arc<dyn HeaderStore>,
            Arc::clone(&chain) as Arc<dyn ChainSource>,
        )
        .unwrap();
        (store, chain, transformer)
    }

    #[tokio::test]
    async fn execute_twice_writes_rows_once() {
        let mut chain = MockChain::default();
        chain.logs.insert(1, vec![transfer_log(contract(), 1, 0, U256::from(10))]);
        let (store, chain, transformer) = setup(chain, 0, None);
        store.create_or_update_header(&block(1)).await.unwrap();

        let first = transformer.execute().await.unwrap();
        assert_eq!(first, ExecuteSummary { checked: 1, skipped: 0, failed: 0 });

        let second = transformer.execute().await.unwrap();
        assert_eq!(second, ExecuteSummary::default());
        assert_eq!(chain.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);
    }

    #[tokio::test]
    async fn header_without_logs_is_still_checked() {
        let (store, _chain, transformer) = setup(MockChain::default(), 0, None);
        let header = store.create_or_update_header(&block(3)).await.unwrap();

        transformer.execute().await.unwrap();
        assert!(store.is_checked(header.id, transformer.kind()).await.unwrap());
        assert!(store.records(ERC20_TRANSFERS.name).is_empty());
    }

    #[tokio::test]
    async fn failed_persist_rolls_back_and_is_retried() {
        let mut chain = MockChain::default();
        chain.logs.insert(1, vec![transfer_log(contract(), 1, 0, U256::from(10))]);
        let (store, _chain, transformer) = setup(chain, 0, None);
        let header = store.create_or_update_header(&block(1)).await.unwrap();

        store.fail_next_persist();
        let summary = transformer.execute().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(store.records(ERC20_TRANSFERS.name).is_empty());
        assert!(!store.is_checked(header.id, transformer.kind()).await.unwrap());

        let summary = transformer.execute().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);
    }

    #[tokio::test]
    async fn racing_writer_is_benign() {
        let mut chain = MockChain::default();
        chain.logs.insert(1, vec![transfer_log(contract(), 1, 0, U256::from(10))]);
        let (store, _chain, transformer) = setup(chain, 0, None);
        let header = store.create_or_update_header(&block(1)).await.unwrap();

        // Both pipelines saw the header as missing before either committed.
        let logs = transformer.fetch_logs(&header).await.unwrap();
        let records = transformer.convert(&logs).unwrap();
        assert_eq!(transformer.persist(&header, &records).await.unwrap(), PersistOutcome::Committed);
        assert_eq!(
            transformer.persist(&header, &records).await.unwrap(),
            PersistOutcome::AlreadyChecked
        );
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);
    }

    #[tokio::test]
    async fn process_payload_filters_and_respects_range() {
        let (store, _chain, transformer) = setup(MockChain::default(), 5, Some(10));
        let inside = store.create_or_update_header(&block(5)).await.unwrap();
        let outside = store.create_or_update_header(&block(11)).await.unwrap();

        let logs = vec![
            transfer_log(contract(), 5, 0, U256::from(1)),
            transfer_log(Address::repeat_byte(0x99), 5, 1, U256::from(2)),
        ];
        let outcome = transformer.process_payload(&inside, &logs).await.unwrap();
        assert_eq!(outcome, Some(PersistOutcome::Committed));
        assert_eq!(store.records(ERC20_TRANSFERS.name).len(), 1);

        assert_eq!(transformer.process_payload(&outside, &logs).await.unwrap(), None);
        assert!(!store.is_checked(outside.id, transformer.kind()).await.unwrap());
    }
}
