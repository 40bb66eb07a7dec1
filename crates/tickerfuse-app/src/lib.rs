//! Consolidated multi-exchange ticker feed.
//!
//! Composes the exchange connections and the aggregation engine behind one
//! `TickerFeed`:
//! - TOML configuration (`AppConfig`)
//! - Lifecycle (`start`/`stop`) and symbol subscription
//! - Consolidated quote lookups and an event stream

pub mod config;
pub mod error;
pub mod feed;

pub use config::{AppConfig, ExchangeSettings, TelemetryConfig};
pub use error::{AppError, AppResult};
pub use feed::{FeedEvent, TickerFeed};
