//! Prometheus metrics for tickerfuse.
//!
//! Covers exchange connection state, raw quote intake and the outcome of
//! every aggregation pass.
//!
//! # Panics
//!
//! Metric registration unwraps: a failure means a duplicate metric name,
//! which is a programming error caught on first use.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

const STATES: [&str; 5] = [
    "disconnected",
    "connecting",
    "connected",
    "reconnecting",
    "failed",
];

/// Exchange connection up (1) or not (0).
pub static EXCHANGE_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickerfuse_exchange_connected",
        "Exchange WebSocket connected (1=connected)",
        &["exchange"]
    )
    .unwrap()
});

/// Connection state machine, one active state per exchange.
pub static EXCHANGE_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickerfuse_exchange_state",
        "Exchange connection state (1=active, 0=inactive)",
        &["exchange", "state"]
    )
    .unwrap()
});

pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_reconnect_total",
        "Total exchange reconnection attempts",
        &["exchange"]
    )
    .unwrap()
});

pub static EXCHANGE_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_exchange_failed_total",
        "Times an exchange exhausted its reconnection attempts",
        &["exchange"]
    )
    .unwrap()
});

pub static RAW_QUOTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_raw_quotes_total",
        "Normalized quotes received per exchange",
        &["exchange"]
    )
    .unwrap()
});

/// Delay between a quote's `observedAt` and its aggregation.
pub static QUOTE_DELAY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickerfuse_quote_delay_ms",
        "Delay from quote receipt to aggregation in milliseconds",
        &["exchange"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 500.0, 1000.0]
    )
    .unwrap()
});

pub static PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_consolidated_published_total",
        "Consolidated quotes published",
        &["symbol"]
    )
    .unwrap()
});

pub static OUTLIER_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_outlier_rejected_total",
        "Consolidated candidates discarded by the deviation check",
        &["symbol"]
    )
    .unwrap()
});

pub static NO_FRESH_DATA_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickerfuse_no_fresh_data_total",
        "Aggregation passes skipped because every contributor was stale",
        &["symbol"]
    )
    .unwrap()
});

/// Consolidated spread in basis points of the price.
pub static SPREAD_BPS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickerfuse_consolidated_spread_bps",
        "Consolidated bid/ask spread in basis points",
        &["symbol"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record an exchange's connection state.
    pub fn exchange_state(exchange: &str, state: &str) {
        for s in STATES {
            EXCHANGE_STATE.with_label_values(&[exchange, s]).set(0.0);
        }
        EXCHANGE_STATE.with_label_values(&[exchange, state]).set(1.0);
        let connected = if state == "connected" { 1.0 } else { 0.0 };
        EXCHANGE_CONNECTED.with_label_values(&[exchange]).set(connected);
    }

    pub fn reconnect(exchange: &str) {
        RECONNECT_TOTAL.with_label_values(&[exchange]).inc();
    }

    pub fn exchange_failed(exchange: &str) {
        EXCHANGE_FAILED_TOTAL.with_label_values(&[exchange]).inc();
    }

    pub fn raw_quote(exchange: &str, delay_ms: f64) {
        RAW_QUOTES_TOTAL.with_label_values(&[exchange]).inc();
        QUOTE_DELAY_MS
            .with_label_values(&[exchange])
            .observe(delay_ms.max(0.0));
    }

    pub fn published(symbol: &str, spread_bps: Option<f64>) {
        PUBLISHED_TOTAL.with_label_values(&[symbol]).inc();
        if let Some(bps) = spread_bps {
            SPREAD_BPS.with_label_values(&[symbol]).set(bps);
        }
    }

    pub fn outlier_rejected(symbol: &str) {
        OUTLIER_REJECTED_TOTAL.with_label_values(&[symbol]).inc();
    }

    pub fn no_fresh_data(symbol: &str) {
        NO_FRESH_DATA_TOTAL.with_label_values(&[symbol]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
