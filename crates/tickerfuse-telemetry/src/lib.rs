//! Prometheus metrics and structured logging for tickerfuse.
//!
//! - Prometheus metrics for exchange connections and quote aggregation
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
