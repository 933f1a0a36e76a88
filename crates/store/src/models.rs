//! Records written by transformers and the kinds that own them.
use eyre::{Result, bail};
use serde::Serialize;

use crate::schema::TableSchema;

/// Longest transformer name accepted; keeps `<name>_checked` a valid identifier.
const MAX_NAME_LEN: usize = 48;

/// Value of one domain column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnValue {
    /// Plain text (addresses, hashes)
    Text(String),
    /// Arbitrary precision integer as base-10 text, written to a `NUMERIC` column
    Numeric(String),
    /// 64-bit integer
    BigInt(i64),
}

/// One decoded log, ready to be inserted into a transformer's result table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Index of the transaction within the block
    pub tx_idx: u64,
    /// Index of the log within the block
    pub log_idx: u64,
    /// The undecoded log as JSON
    pub raw_log: serde_json::Value,
    /// Domain columns in table order
    pub fields: Vec<(&'static str, ColumnValue)>,
}

impl EventRecord {
    /// Value of a domain column, if present.
    pub fn field(&self, column: &str) -> Option<&ColumnValue> {
        self.fields.iter().find(|(name, _)| *name == column).map(|(_, value)| value)
    }
}

/// Identity of a transformer inside the store: its checked column, its result
/// table and the block range it is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerKind {
    name: String,
    table: &'static TableSchema,
    starting_block: u64,
    ending_block: Option<u64>,
}

impl TransformerKind {
    /// Create a kind, validating the name and the block range.
    pub fn new(
        name: &str,
        table: &'static TableSchema,
        starting_block: u64,
        ending_block: Option<u64>,
    ) -> Result<Self> {
        let valid_chars = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
        if !valid_chars || !starts_with_letter || name.len() > MAX_NAME_LEN {
            bail!("invalid transformer name {name:?}: use lowercase letters, digits and '_'");
        }
        if let Some(end) = ending_block {
            if end < starting_block {
                bail!("transformer {name}: ending block {end} is below starting block {starting_block}");
            }
        }
        Ok(Self { name: name.to_owned(), table, starting_block, ending_block })
    }

    /// Registry name of the transformer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Result table owned by the transformer.
    pub const fn table(&self) -> &'static TableSchema {
        self.table
    }

    /// Name of the boolean column in `checked_headers`.
    pub fn checked_column(&self) -> String {
        format!("{}_checked", self.name)
    }

    /// First height the transformer processes.
    pub const fn starting_block(&self) -> u64 {
        self.starting_block
    }

    /// Last height the transformer processes, if bounded.
    pub const fn ending_block(&self) -> Option<u64> {
        self.ending_block
    }

    /// Whether the transformer is responsible for `height`.
    pub fn covers(&self, height: u64) -> bool {
        height >= self.starting_block && self.ending_block.is_none_or(|end| height <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TABLE: TableSchema = TableSchema { name: "events", columns: "value NUMERIC NOT NULL" };

    #[test]
    fn kind_rejects_unsafe_names() {
        assert!(TransformerKind::new("transfer; DROP TABLE headers", &TABLE, 0, None).is_err());
        assert!(TransformerKind::new("Transfer", &TABLE, 0, None).is_err());
        assert!(TransformerKind::new("1transfer", &TABLE, 0, None).is_err());
        assert!(TransformerKind::new("", &TABLE, 0, None).is_err());
    }

    #[test]
    fn kind_rejects_inverted_range() {
        assert!(TransformerKind::new("transfer", &TABLE, 10, Some(9)).is_err());
    }

    #[test]
    fn kind_covers_its_range() {
        let kind = TransformerKind::new("erc20_transfer", &TABLE, 10, Some(20)).unwrap();
        assert_eq!(kind.checked_column(), "erc20_transfer_checked");
        assert!(!kind.covers(9));
        assert!(kind.covers(10));
        assert!(kind.covers(20));
        assert!(!kind.covers(21));

        let open = TransformerKind::new("erc20_transfer", &TABLE, 0, None).unwrap();
        assert!(open.covers(u64::MAX));
    }
}
