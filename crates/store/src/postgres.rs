//! Postgres implementation of [`HeaderStore`] backed by a shared sqlx pool.
use std::str::FromStr;

use alloy_primitives::BlockHash;
use async_trait::async_trait;
use derive_more::Debug;
use eyre::{Context, Result};
use primitives::{
    gaps::DBGap,
    headers::{BlockHeader, Header},
};
use sqlx::{
    FromRow, PgPool, Postgres, Transaction,
    postgres::{PgArguments, PgPoolOptions},
    query::Query,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    HeaderStore, PersistOutcome, ensure_unique_positions,
    models::{ColumnValue, EventRecord, TransformerKind},
    schema::{CHECKED_HEADERS_DDL, CORE_TABLES, HEADERS_DDL, add_checked_column_statement},
};

const HEADER_COLUMNS: &str = "id, block_number, hash, parent_hash, block_timestamp";

#[derive(FromRow)]
struct HeaderRow {
    id: i64,
    block_number: i64,
    hash: String,
    parent_hash: String,
    block_timestamp: i64,
}

impl TryFrom<HeaderRow> for Header {
    type Error = eyre::Error;

    fn try_from(row: HeaderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            block_number: u64::try_from(row.block_number)?,
            hash: BlockHash::from_str(&row.hash)
                .wrap_err_with(|| format!("invalid hash for header {}", row.id))?,
            parent_hash: BlockHash::from_str(&row.parent_hash)
                .wrap_err_with(|| format!("invalid parent hash for header {}", row.id))?,
            timestamp: u64::try_from(row.block_timestamp)?,
        })
    }
}

fn db_height(height: u64) -> Result<i64> {
    i64::try_from(height).wrap_err_with(|| format!("block number {height} exceeds BIGINT range"))
}


/// Postgres header store
#[derive(Clone, Debug)]
pub struct PgStore {
    #[debug(skip)]
    pool: PgPool,
}

impl PgStore {
    /// Connect a new pool to the given database.
    pub async fn connect(url: &Url, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url.as_str())
            .await
            .wrap_err("Failed to connect to Postgres")?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The shared connection pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the core tables, optionally dropping everything first.
    ///
    /// Result tables of `kinds` are dropped on reset as well; they are
    /// recreated by [`HeaderStore::register_transformer`].
    pub async fn init_db(&self, reset: bool, kinds: &[TransformerKind]) -> Result<()> {
        if reset {
            for kind in kinds {
                self.drop_table(kind.table().name).await?;
            }
            for table in CORE_TABLES.iter().rev() {
                self.drop_table(table).await?;
            }
            info!("Database reset complete");
        }

        for ddl in [HEADERS_DDL, CHECKED_HEADERS_DDL] {
            sqlx::query(ddl).execute(&self.pool).await.wrap_err("Failed to create core tables")?;
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to drop {} table", table))?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_record(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        header_id: i64,
        record: &EventRecord,
    ) -> Result<()> {
        let tx_idx = i64::try_from(record.tx_idx)
            .wrap_err_with(|| format!("transaction index {} exceeds BIGINT range", record.tx_idx))?;
        let log_idx = i64::try_from(record.log_idx)
            .wrap_err_with(|| format!("log index {} exceeds BIGINT range", record.log_idx))?;

        let mut columns = vec!["header_id"];
        let mut values = vec!["$1".to_owned()];
        for (i, (column, value)) in record.fields.iter().enumerate() {
            columns.push(column);
            let placeholder = i + 2;
            values.push(match value {
                ColumnValue::Numeric(_) => format!("${}::NUMERIC", placeholder),
                ColumnValue::Text(_) | ColumnValue::BigInt(_) => format!("${}", placeholder),
            });
        }
        let next = record.fields.len() + 2;
        columns.extend(["tx_idx", "log_idx", "raw_log"]);
        values.extend([
            format!("${}", next),
            format!("${}", next + 1),
            format!("${}::JSONB", next + 2),
        ]);

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            values.join(", ")
        );

        let mut query: Query<'_, Postgres, PgArguments> = sqlx::query(&sql).bind(header_id);
        for (_, value) in &record.fields {
            query = match value {
                ColumnValue::Text(text) | ColumnValue::Numeric(text) => query.bind(text.as_str()),
                ColumnValue::BigInt(n) => query.bind(*n),
            };
        }
        query
            .bind(tx_idx)
            .bind(log_idx)
            .bind(record.raw_log.to_string())
            .execute(&mut **tx)
            .await
            .wrap_err_with(|| {
                format!("Failed to insert {} row for header {}", table, header_id)
            })?;
        Ok(())
    }
}

#[async_trait]
impl HeaderStore for PgStore {
    async fn register_transformer(&self, kind: &TransformerKind) -> Result<()> {
        sqlx::query(&kind.table().create_statement())
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to create {} table", kind.table().name))?;
        sqlx::query(&add_checked_column_statement(&kind.checked_column()))
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to add checked column for {}", kind.name()))?;
        info!(transformer = kind.name(), table = kind.table().name, "Registered transformer");
        Ok(())
    }

    async fn create_or_update_header(&self, block: &BlockHeader) -> Result<Header> {
        let number = db_height(block.number)?;
        let hash = block.hash.to_string();
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin header transaction")?;

        let existing: Option<HeaderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM headers WHERE block_number = $1 FOR UPDATE",
            HEADER_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            if row.hash == hash {
                tx.commit().await?;
                return row.try_into();
            }
            warn!(
                block_number = block.number,
                stored_hash = %row.hash,
                new_hash = %hash,
                "Replacing header with a different hash"
            );
            sqlx::query("DELETE FROM headers WHERE id = $1").bind(row.id).execute(&mut *tx).await?;
        }

        let row: HeaderRow = sqlx::query_as(&format!(
            "INSERT INTO headers (block_number, hash, parent_hash, block_timestamp) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (block_number) DO UPDATE SET block_number = EXCLUDED.block_number \
             RETURNING {}",
            HEADER_COLUMNS
        ))
        .bind(number)
        .bind(&hash)
        .bind(block.parent_hash.to_string())
        .bind(db_height(block.timestamp)?)
        .fetch_one(&mut *tx)
        .await
        .wrap_err_with(|| format!("Failed to insert header {}", block.number))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn latest_header_number(&self) -> Result<Option<u64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM headers")
            .fetch_one(&self.pool)
            .await
            .wrap_err("fetching max(block_number) failed")?;
        max.map(u64::try_from).transpose().map_err(Into::into)
    }

    async fn missing_headers(&self, kind: &TransformerKind) -> Result<Vec<Header>> {
        let query = format!(
            "SELECT h.id, h.block_number, h.hash, h.parent_hash, h.block_timestamp \
             FROM headers h \
             LEFT JOIN checked_headers c ON c.header_id = h.id \
             WHERE (c.header_id IS NULL OR c.{} IS FALSE) \
               AND h.block_number >= $1 \
               AND ($2::BIGINT IS NULL OR h.block_number <= $2) \
             ORDER BY h.block_number",
            kind.checked_column()
        );
        let ending = kind.ending_block().map(db_height).transpose()?;
        let rows: Vec<HeaderRow> = sqlx::query_as(&query)
            .bind(db_height(kind.starting_block())?)
            .bind(ending)
            .fetch_all(&self.pool)
            .await
            .wrap_err_with(|| format!("fetching missing headers for {} failed", kind.name()))?;
        debug!(transformer = kind.name(), count = rows.len(), "Fetched missing headers");
        rows.into_iter().map(Header::try_from).collect()
    }

    async fn is_checked(&self, header_id: i64, kind: &TransformerKind) -> Result<bool> {
        let checked: Option<bool> = sqlx::query_scalar(&format!(
            "SELECT {} FROM checked_headers WHERE header_id = $1",
            kind.checked_column()
        ))
        .bind(header_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(checked.unwrap_or(false))
    }

    async fn persist_checked(
        &self,
        header_id: i64,
        kind: &TransformerKind,
        records: &[EventRecord],
    ) -> Result<PersistOutcome> {
        let column = kind.checked_column();
        // Dropping `tx` on any early return rolls the whole header back.
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin persist transaction")?;

        // Concurrent writers serialize on this row.
        sqlx::query(
            "INSERT INTO checked_headers (header_id) VALUES ($1) ON CONFLICT (header_id) DO NOTHING",
        )
        .bind(header_id)
        .execute(&mut *tx)
        .await?;
        let already: bool = sqlx::query_scalar(&format!(
            "SELECT {} FROM checked_headers WHERE header_id = $1 FOR UPDATE",
            column
        ))
        .bind(header_id)
        .fetch_one(&mut *tx)
        .await?;
        if already {
            tx.rollback().await?;
            return Ok(PersistOutcome::AlreadyChecked);
        }

        ensure_unique_positions(header_id, records)?;
        for record in records {
            Self::insert_record(&mut tx, kind.table().name, header_id, record).await?;
        }

        sqlx::query(&format!("UPDATE checked_headers SET {} = TRUE WHERE header_id = $1", column))
            .bind(header_id)
            .execute(&mut *tx)
            .await
            .wrap_err_with(|| format!("Failed to mark header {} checked", header_id))?;

        tx.commit().await.wrap_err("Failed to commit persist transaction")?;
        Ok(PersistOutcome::Committed)
    }

    async fn incomplete_ranges(
        &self,
        start: u64,
        stop: u64,
        kinds: &[TransformerKind],
    ) -> Result<Vec<DBGap>> {
        if stop < start {
            return Ok(Vec::new());
        }

        let conditions: String = kinds
            .iter()
            .map(|kind| {
                let ending = kind
                    .ending_block()
                    .map(|end| format!(" OR h.block_number > {}", end))
                    .unwrap_or_default();
                format!(
                    " AND (COALESCE(c.{}, FALSE) OR h.block_number < {}{})",
                    kind.checked_column(),
                    kind.starting_block(),
                    ending
                )
            })
            .collect();

        // Sentinels at start - 1 and stop + 1 turn leading and trailing
        // holes into ordinary discontinuities. NUMERIC keeps stop + 1 from
        // overflowing at the top of the BIGINT range.
        let query = format!(
            "WITH done AS ( \
                SELECT h.block_number AS n \
                FROM headers h \
                LEFT JOIN checked_headers c ON c.header_id = h.id \
                WHERE h.block_number BETWEEN $1 AND $2{} \
                UNION ALL SELECT $1::NUMERIC - 1 \
                UNION ALL SELECT $2::NUMERIC + 1 \
             ) \
             SELECT (n + 1)::BIGINT AS gap_start, (next_n - 1)::BIGINT AS gap_stop \
             FROM (SELECT n, LEAD(n) OVER (ORDER BY n) AS next_n FROM done) d \
             WHERE next_n > n + 1 \
             ORDER BY gap_start",
            conditions
        );

        let rows: Vec<(i64, i64)> = sqlx::query_as(&query)
            .bind(db_height(start)?)
            .bind(db_height(stop)?)
            .fetch_all(&self.pool)
            .await
            .wrap_err("fetching incomplete ranges failed")?;

        rows.into_iter()
            .map(|(gap_start, gap_stop)| {
                DBGap::new(u64::try_from(gap_start)?, u64::try_from(gap_stop)?)
            })
            .collect()
    }
}
