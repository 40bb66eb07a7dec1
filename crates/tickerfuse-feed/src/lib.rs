//! Quote normalization and cross-exchange aggregation.
//!
//! Turns exchange-specific ticker messages into canonical `Quote`s and
//! merges the latest quote from every exchange into one consolidated quote
//! per symbol.

pub mod aggregator;
pub mod error;
pub mod normalizer;

pub use aggregator::{
    AggregateOutcome, AggregationConfig, AggregationStrategy, QuoteAggregator,
};
pub use error::{FeedError, FeedResult};
pub use normalizer::{normalize, Normalizer};
