//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement the two
//! sides of a secure-aggregation exchange.

mod aggregator;
mod processor;

pub use aggregator::HistogramAggregator;
pub use processor::SecureProcessor;
