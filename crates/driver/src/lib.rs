//! Chainfill Driver crate root
#![allow(clippy::uninlined_format_args)]

pub mod backfill;
pub mod driver;
pub mod fetcher;
pub mod gap_retriever;
pub mod iterative;
mod subscription;
pub mod watcher;

pub use backfill::{BackfillConfig, BackfillService, CycleReport};
pub use driver::Driver;
pub use fetcher::{ChainPayloadFetcher, PayloadFetcher};
pub use gap_retriever::{GapRetriever, StoreGapRetriever};
pub use iterative::{BlockTransformer, IterativeTransformer, TransformOutcome};
pub use watcher::Watcher;
