//! Raw chain data fetched for a single block height.
use alloy::rpc::types::Log;
use serde::{Deserialize, Serialize};

use crate::headers::BlockHeader;

/// Block header plus every log emitted in that block.
///
/// Payloads are ephemeral: fetched by the backfiller, handed to the iterative
/// transformer and dropped once the height is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Header of the block
    pub header: BlockHeader,
    /// Logs emitted in the block, in log index order
    pub logs: Vec<Log>,
}

impl Payload {
    /// Create a payload for the given header and logs.
    pub const fn new(header: BlockHeader, logs: Vec<Log>) -> Self {
        Self { header, logs }
    }

    /// Height this payload belongs to.
    pub const fn block_number(&self) -> u64 {
        self.header.number
    }
}
