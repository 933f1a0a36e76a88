//! Persistent header store with per-transformer checked markers.
//!
//! Every transformer owns one result table and one boolean column in
//! `checked_headers`. A marker only ever flips to `true` inside the same
//! transaction that commits the transformer's rows for that header.
#![allow(clippy::uninlined_format_args)]

use std::{collections::HashSet, fmt::Debug};

use async_trait::async_trait;
use eyre::{Result, bail};
use primitives::{
    gaps::DBGap,
    headers::{BlockHeader, Header},
};

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use models::{ColumnValue, EventRecord, TransformerKind};
pub use postgres::PgStore;
pub use schema::TableSchema;

/// Result of persisting a transformer's records for one header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Rows and marker were committed by this call.
    Committed,
    /// Another writer had already committed this header; nothing was written.
    AlreadyChecked,
}

/// Reject a record set that repeats a `(tx_idx, log_idx)` position.
///
/// Such a set can never satisfy the result table's unique key, so the header
/// would stay unchecked on every retry.
pub(crate) fn ensure_unique_positions(header_id: i64, records: &[EventRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if !seen.insert((record.tx_idx, record.log_idx)) {
            bail!(
                "duplicate log position (tx {}, log {}) for header {}",
                record.tx_idx,
                record.log_idx,
                header_id
            );
        }
    }
    Ok(())
}

/// Storage operations needed by the backfill and live pipelines.
#[async_trait]
pub trait HeaderStore: Send + Sync + Debug {
    /// Create the result table and checked column for a transformer.
    async fn register_transformer(&self, kind: &TransformerKind) -> Result<()>;

    /// Persist an observed header, returning the stored row.
    ///
    /// Re-submitting the same hash is a no-op. A different hash replaces the
    /// row, dropping derived rows and markers of the stale version.
    async fn create_or_update_header(&self, block: &BlockHeader) -> Result<Header>;

    /// Highest block number with a header row.
    async fn latest_header_number(&self) -> Result<Option<u64>>;

    /// Headers inside the transformer's range that it has not checked yet, ascending.
    async fn missing_headers(&self, kind: &TransformerKind) -> Result<Vec<Header>>;

    /// Whether the transformer has committed the given header.
    async fn is_checked(&self, header_id: i64, kind: &TransformerKind) -> Result<bool>;

    /// Insert `records` for a header and mark it checked, atomically.
    ///
    /// Returns [`PersistOutcome::AlreadyChecked`] only when the marker was
    /// already set. Records repeating a log position are an error.
    async fn persist_checked(
        &self,
        header_id: i64,
        kind: &TransformerKind,
        records: &[EventRecord],
    ) -> Result<PersistOutcome>;

    /// Ranges inside `[start, stop]` lacking a header row or a `true` marker
    /// for any transformer whose range covers the height. Ordered ascending.
    async fn incomplete_ranges(
        &self,
        start: u64,
        stop: u64,
        kinds: &[TransformerKind],
    ) -> Result<Vec<DBGap>>;
}
