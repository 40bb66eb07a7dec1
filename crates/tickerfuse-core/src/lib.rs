//! Core domain types for the tickerfuse consolidated ticker feed.
//!
//! This crate provides the types shared by every other crate:
//! - `Quote`: one instrument's price/volume snapshot from an exchange or the consolidated view
//! - `TickerSnapshot`: the exchange-neutral fields a normalizer extracts before building a `Quote`
//! - `ExchangeKind`: the closed set of supported wire protocols
//! - Symbol normalization and exchange-native symbol mapping

pub mod error;
pub mod exchange;
pub mod quote;
pub mod symbol;

pub use error::{CoreError, Result};
pub use exchange::ExchangeKind;
pub use quote::{Quote, TickerSnapshot, AGGREGATED_SOURCE};
pub use symbol::{normalize_symbol, split_symbol};
