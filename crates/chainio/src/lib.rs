//! `ChainIO` holds the on-chain bindings used by the transformers.

use alloy::{
    primitives::{Address, B256, BlockNumber},
    providers::{RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers},
    rpc::types::Filter,
    sol,
};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}

/// Log [`Filter`] matching one event signature from one contract at a single height.
pub fn event_filter_at(address: Address, event_signature: B256, block: BlockNumber) -> Filter {
    Filter::new().address(address).event_signature(event_signature).from_block(block).to_block(block)
}

/// Log [`Filter`] matching every log emitted at a single height.
pub fn block_filter_at(block: BlockNumber) -> Filter {
    Filter::new().from_block(block).to_block(block)
}
