//! Exchange message normalization.
//!
//! One submodule per wire protocol. Each exposes `parse`, which returns
//! `Ok(None)` for messages that are not tickers (acks, heartbeats, status
//! events) and `Err` for ticker messages that fail validation. The public
//! entry points collapse both into `None`: feeds interleave tickers with
//! control traffic, so a skipped message is routine and never an error.

mod binance;
mod bybit;
mod coinbase;
mod kraken;

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tickerfuse_core::{ExchangeKind, Quote, TickerSnapshot};
use tracing::{debug, trace};

/// Normalizer bound to one configured exchange.
#[derive(Debug, Clone)]
pub struct Normalizer {
    kind: ExchangeKind,
    source: String,
}

impl Normalizer {
    /// Create a normalizer for the exchange named `source` speaking `kind`.
    pub fn new(kind: ExchangeKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalize one decoded message. Never panics.
    pub fn normalize(&self, raw: &Value, received_at: DateTime<Utc>) -> Option<Quote> {
        let parsed = match self.kind {
            ExchangeKind::Binance => binance::parse(raw),
            ExchangeKind::Coinbase => coinbase::parse(raw),
            ExchangeKind::Kraken => kraken::parse(raw),
            ExchangeKind::Bybit => bybit::parse(raw),
        };

        match parsed {
            Ok(Some(snapshot)) => Some(snapshot.into_quote(&self.source, received_at)),
            Ok(None) => {
                trace!(exchange = %self.source, "Non-ticker message skipped");
                None
            }
            Err(e) => {
                debug!(exchange = %self.source, error = %e, "Malformed ticker message dropped");
                None
            }
        }
    }

    /// Normalize one raw text frame.
    pub fn normalize_text(&self, text: &str, received_at: DateTime<Utc>) -> Option<Quote> {
        match serde_json::from_str::<Value>(text) {
            Ok(raw) => self.normalize(&raw, received_at),
            Err(e) => {
                debug!(exchange = %self.source, error = %e, "Undecodable frame dropped");
                None
            }
        }
    }
}

/// Normalize a message from the exchange named `exchange`, whose protocol is
/// inferred from the name. Unknown exchange names yield `None`.
pub fn normalize(exchange: &str, raw: &Value, received_at: DateTime<Utc>) -> Option<Quote> {
    let kind = exchange.parse::<ExchangeKind>().ok()?;
    Normalizer::new(kind, exchange).normalize(raw, received_at)
}

/// Read a numeric field that may be a JSON number or a numeric string.
pub(crate) fn number(value: &Value, field: &'static str) -> FeedResult<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(FeedError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// Required numeric field of an object.
pub(crate) fn required(obj: &Value, key: &'static str) -> FeedResult<f64> {
    let value = obj.get(key).ok_or(FeedError::MissingField(key))?;
    number(value, key)
}

/// Optional numeric field of an object; absent or null maps to `None`.
pub(crate) fn optional(obj: &Value, key: &'static str) -> FeedResult<Option<f64>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => number(value, key).map(Some),
    }
}

/// Required string field of an object.
pub(crate) fn text<'a>(obj: &'a Value, key: &'static str) -> FeedResult<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(FeedError::MissingField(key))
}

/// Reject snapshots whose last price cannot be aggregated.
pub(crate) fn validated(snapshot: TickerSnapshot) -> FeedResult<Option<TickerSnapshot>> {
    if snapshot.price > 0.0 && snapshot.price.is_finite() {
        Ok(Some(snapshot))
    } else {
        Err(FeedError::InvalidPrice(snapshot.price))
    }
}
