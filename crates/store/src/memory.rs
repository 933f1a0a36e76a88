//! In-memory [`HeaderStore`] used by tests.
//!
//! Mirrors the transactional guarantees of the Postgres store: records and the
//! checked marker of a header become visible together or not at all.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use eyre::{Result, bail, eyre};
use primitives::{
    gaps::{DBGap, gaps_in_range},
    headers::{BlockHeader, Header},
};

use crate::{
    HeaderStore, PersistOutcome, ensure_unique_positions,
    models::{EventRecord, TransformerKind},
};

#[derive(Debug, Clone)]
struct StoredRecord {
    header_id: i64,
    record: EventRecord,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    headers: BTreeMap<u64, Header>,
    checked: HashMap<i64, HashSet<String>>,
    tables: HashMap<&'static str, Vec<StoredRecord>>,
    registered: HashSet<String>,
    fail_next_persist: bool,
    unavailable: bool,
}

impl State {
    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            bail!("store unavailable");
        }
        Ok(())
    }

    fn is_checked(&self, header_id: i64, column: &str) -> bool {
        self.checked.get(&header_id).is_some_and(|cols| cols.contains(column))
    }

    fn drop_header(&mut self, header_id: i64) {
        self.checked.remove(&header_id);
        for rows in self.tables.values_mut() {
            rows.retain(|row| row.header_id != header_id);
        }
    }
}

/// Header store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| eyre!("memory store lock poisoned"))
    }

    /// Make the next `persist_checked` call fail before anything is committed.
    pub fn fail_next_persist(&self) {
        if let Ok(mut state) = self.state() {
            state.fail_next_persist = true;
        }
    }

    /// Make every operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state() {
            state.unavailable = unavailable;
        }
    }

    /// Records committed to `table`, in insertion order.
    pub fn records(&self, table: &str) -> Vec<EventRecord> {
        self.state()
            .map(|state| {
                state
                    .tables
                    .get(table)
                    .map(|rows| rows.iter().map(|row| row.record.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Stored header at `height`.
    pub fn header(&self, height: u64) -> Option<Header> {
        self.state().ok().and_then(|state| state.headers.get(&height).cloned())
    }
}

#[async_trait]
impl HeaderStore for MemoryStore {
    async fn register_transformer(&self, kind: &TransformerKind) -> Result<()> {
        let mut state = self.state()?;
        state.ensure_available()?;
        state.registered.insert(kind.name().to_owned());
        state.tables.entry(kind.table().name).or_default();
        Ok(())
    }

    async fn create_or_update_header(&self, block: &BlockHeader) -> Result<Header> {
        let mut state = self.state()?;
        state.ensure_available()?;

        if let Some(existing) = state.headers.get(&block.number).cloned() {
            if existing.hash == block.hash {
                return Ok(existing);
            }
            state.drop_header(existing.id);
        }

        state.next_id += 1;
        let header = Header::from_block(state.next_id, block);
        state.headers.insert(block.number, header.clone());
        Ok(header)
    }

    async fn latest_header_number(&self) -> Result<Option<u64>> {
        let state = self.state()?;
        state.ensure_available()?;
        Ok(state.headers.keys().next_back().copied())
    }

    async fn missing_headers(&self, kind: &TransformerKind) -> Result<Vec<Header>> {
        let state = self.state()?;
        state.ensure_available()?;
        let column = kind.checked_column();
        Ok(state
            .headers
            .values()
            .filter(|h| kind.covers(h.block_number) && !state.is_checked(h.id, &column))
            .cloned()
            .collect())
    }

    async fn is_checked(&self, header_id: i64, kind: &TransformerKind) -> Result<bool> {
        let state = self.state()?;
        state.ensure_available()?;
        Ok(state.is_checked(header_id, &kind.checked_column()))
    }

    async fn persist_checked(
        &self,
        header_id: i64,
        kind: &TransformerKind,
        records: &[EventRecord],
    ) -> Result<PersistOutcome> {
        let mut state = self.state()?;
        state.ensure_available()?;

        if !state.headers.values().any(|h| h.id == header_id) {
            bail!("header {header_id} does not exist");
        }
        let column = kind.checked_column();
        if state.is_checked(header_id, &column) {
            return Ok(PersistOutcome::AlreadyChecked);
        }

        ensure_unique_positions(header_id, records)?;
        let table = kind.table().name;

        // Staged rows are discarded together with the marker.
        if state.fail_next_persist {
            state.fail_next_persist = false;
            bail!("injected failure persisting header {header_id}");
        }

        state
            .tables
            .entry(table)
            .or_default()
            .extend(records.iter().map(|record| StoredRecord { header_id, record: record.clone() }));
        state.checked.entry(header_id).or_default().insert(column);
        Ok(PersistOutcome::Committed)
    }

    async fn incomplete_ranges(
        &self,
        start: u64,
        stop: u64,
        kinds: &[TransformerKind],
    ) -> Result<Vec<DBGap>> {
        let state = self.state()?;
        state.ensure_available()?;
        if stop < start {
            return Ok(Vec::new());
        }
        let columns: Vec<(String, &TransformerKind)> =
            kinds.iter().map(|kind| (kind.checked_column(), kind)).collect();

        let complete = state.headers.range(start..=stop).filter_map(|(height, header)| {
            columns
                .iter()
                .all(|(column, kind)| !kind.covers(*height) || state.is_checked(header.id, column))
                .then_some(*height)
        });
        Ok(gaps_in_range(start, stop, complete))
    }
}
