//! Block header data structures and stream type aliases.
use std::pin::Pin;

use alloy_primitives::BlockHash;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

/// Header as observed on chain, before it has been persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: BlockHash,
    /// Block parent hash
    pub parent_hash: BlockHash,
    /// Block timestamp
    pub timestamp: u64,
}

/// Header row tracked by the store. One row exists per processed height.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Header {
    /// Store-assigned identifier
    pub id: i64,
    /// Block number, unique across the table
    pub block_number: u64,
    /// Block hash
    pub hash: BlockHash,
    /// Block parent hash
    pub parent_hash: BlockHash,
    /// Block timestamp
    pub timestamp: u64,
}

impl Header {
    /// Build a persisted header from an observed one and its store id.
    pub const fn from_block(id: i64, block: &BlockHeader) -> Self {
        Self {
            id,
            block_number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp,
        }
    }
}

/// Stream of newly observed block headers
pub type HeaderStream = Pin<Box<dyn Stream<Item = BlockHeader> + Send>>;
