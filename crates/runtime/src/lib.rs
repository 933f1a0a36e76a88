//! Runtime utilities for Chainfill.
#![allow(missing_docs)]

pub mod shutdown;
