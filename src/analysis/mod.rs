//! Analysis modules.
//!
//! Aggregation of scored items into run statistics.

pub mod aggregator;

pub use aggregator::*;
