//! Schema definitions for the relational store

/// Result table definition owned by one transformer kind.
///
/// `columns` only lists the domain columns; the store adds the header foreign
/// key, the transaction/log index pair and the raw log.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static str,
}

/// Core tables, in creation order.
pub const CORE_TABLES: &[&str] = &["headers", "checked_headers"];

pub(crate) const HEADERS_DDL: &str = "CREATE TABLE IF NOT EXISTS headers (
        id BIGSERIAL PRIMARY KEY,
        block_number BIGINT NOT NULL UNIQUE,
        hash TEXT NOT NULL,
        parent_hash TEXT NOT NULL,
        block_timestamp BIGINT NOT NULL,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )";

pub(crate) const CHECKED_HEADERS_DDL: &str = "CREATE TABLE IF NOT EXISTS checked_headers (
        id BIGSERIAL PRIMARY KEY,
        header_id BIGINT NOT NULL UNIQUE REFERENCES headers (id) ON DELETE CASCADE
    )";

impl TableSchema {
    /// `CREATE TABLE` statement for this result table.
    pub fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                header_id BIGINT NOT NULL REFERENCES headers (id) ON DELETE CASCADE,
                {},
                tx_idx BIGINT NOT NULL,
                log_idx BIGINT NOT NULL,
                raw_log JSONB NOT NULL,
                UNIQUE (header_id, tx_idx, log_idx)
            )",
            self.name, self.columns
        )
    }
}

/// `ALTER TABLE` statement adding a checked column.
pub(crate) fn add_checked_column_statement(column: &str) -> String {
    format!(
        "ALTER TABLE checked_headers ADD COLUMN IF NOT EXISTS {} BOOLEAN NOT NULL DEFAULT FALSE",
        column
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: TableSchema =
        TableSchema { name: "test_events", columns: "owner TEXT NOT NULL, value NUMERIC NOT NULL" };

    #[test]
    fn result_table_carries_uniqueness_and_header_fk() {
        let sql = TEST_TABLE.create_statement();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS test_events"));
        assert!(sql.contains("owner TEXT NOT NULL, value NUMERIC NOT NULL"));
        assert!(sql.contains("REFERENCES headers (id) ON DELETE CASCADE"));
        assert!(sql.contains("UNIQUE (header_id, tx_idx, log_idx)"));
    }

    #[test]
    fn checked_column_defaults_to_false() {
        let sql = add_checked_column_statement("transfer_checked");
        assert!(sql.ends_with("transfer_checked BOOLEAN NOT NULL DEFAULT FALSE"));
    }
}
