//! Core primitives shared by the chainfill crates.
/// Missing block ranges and batch arithmetic
pub mod gaps;
/// Block header types
pub mod headers;
/// Decimal text encoding for wei-denominated quantities
pub mod numeric;
/// Raw per-height chain payloads
pub mod payload;
/// Retry helpers for RPC transports
pub mod retries;
