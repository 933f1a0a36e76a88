//! Per-event log converters.
use alloy::rpc::types::Log;
use alloy_primitives::B256;
use alloy_sol_types::SolEvent;
use chainio::IERC20::{Approval, Transfer};
use eyre::{Context, Result, eyre};
use primitives::numeric::to_decimal_text;
use store::{ColumnValue, EventRecord, TableSchema};

/// Result table of [`TransferConverter`].
pub static ERC20_TRANSFERS: TableSchema = TableSchema {
    name: "erc20_transfers",
    columns: "from_address TEXT NOT NULL, to_address TEXT NOT NULL, value NUMERIC NOT NULL",
};

/// Result table of [`ApprovalConverter`].
pub static ERC20_APPROVALS: TableSchema = TableSchema {
    name: "erc20_approvals",
    columns: "owner TEXT NOT NULL, spender TEXT NOT NULL, value NUMERIC NOT NULL",
};

/// Decodes one kind of event log into a row of its result table.
pub trait LogConverter: Send + Sync + std::fmt::Debug + 'static {
    /// Topic0 of the logs this converter understands.
    fn event_signature(&self) -> B256;

    /// Table the records are written to.
    fn table(&self) -> &'static TableSchema;

    /// Decode a single log.
    fn to_record(&self, log: &Log) -> Result<EventRecord>;
}

/// Position and raw JSON shared by every record.
fn record_base(log: &Log) -> Result<(u64, u64, serde_json::Value)> {
    let tx_idx = log.transaction_index.ok_or_else(|| eyre!("log has no transaction index"))?;
    let log_idx = log.log_index.ok_or_else(|| eyre!("log has no log index"))?;
    let raw = serde_json::to_value(log).wrap_err("serialize raw log")?;
    Ok((tx_idx, log_idx, raw))
}

/// ERC-20 `Transfer(from, to, value)`
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferConverter;

impl LogConverter for TransferConverter {
    fn event_signature(&self) -> B256 {
        Transfer::SIGNATURE_HASH
    }

    fn table(&self) -> &'static TableSchema {
        &ERC20_TRANSFERS
    }

    fn to_record(&self, log: &Log) -> Result<EventRecord> {
        let decoded = log.log_decode::<Transfer>().wrap_err("decode Transfer log")?;
        let event = decoded.data();
        let (tx_idx, log_idx, raw_log) = record_base(log)?;
        Ok(EventRecord {
            tx_idx,
            log_idx,
            raw_log,
            fields: vec![
                ("from_address", ColumnValue::Text(event.from.to_string())),
                ("to_address", ColumnValue::Text(event.to.to_string())),
                ("value", ColumnValue::Numeric(to_decimal_text(event.value))),
            ],
        })
    }
}

/// ERC-20 `Approval(owner, spender, value)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalConverter;

impl LogConverter for ApprovalConverter {
    fn event_signature(&self) -> B256 {
        Approval::SIGNATURE_HASH
    }

    fn table(&self) -> &'static TableSchema {
        &ERC20_APPROVALS
    }

    fn to_record(&self, log: &Log) -> Result<EventRecord> {
        let decoded = log.log_decode::<Approval>().wrap_err("decode Approval log")?;
        let event = decoded.data();
        let (tx_idx, log_idx, raw_log) = record_base(log)?;
        Ok(EventRecord {
            tx_idx,
            log_idx,
            raw_log,
            fields: vec![
                ("owner", ColumnValue::Text(event.owner.to_string())),
                ("spender", ColumnValue::Text(event.spender.to_string())),
                ("value", ColumnValue::Numeric(to_decimal_text(event.value))),
            ],
        })
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use alloy::primitives::{Address, LogData, U256};

    use super::*;

    /// RPC log for an ERC-20 `Transfer` at the given position.
    pub(crate) fn transfer_log(
        contract: Address,
        block_number: u64,
        log_idx: u64,
        value: U256,
    ) -> Log {
        let event = Transfer { from: Address::repeat_byte(0xaa), to: Address::repeat_byte(0xbb), value };
        let data: LogData = event.encode_log_data();
        Log {
            inner: alloy_primitives::Log { address: contract, data },
            block_number: Some(block_number),
            transaction_index: Some(0),
            log_index: Some(log_idx),
            ..Default::default()
        }
    }
}
