//! Event transformers: decode contract logs into result rows and commit them
//! together with the header's checked marker.

/// Per-event log converters and their result tables
pub mod converter;
/// Static transformer registry
pub mod registry;
/// The `EventTransformer` trait and its log-based implementation
pub mod transformer;

pub use converter::{ApprovalConverter, LogConverter, TransferConverter};
pub use registry::{ERC20_APPROVAL, ERC20_TRANSFER, TransformerContext, TransformerRegistry};
pub use transformer::{EventTransformer, ExecuteSummary, LogTransformer, TransformerConfig};
