//! Quote types.
//!
//! A `Quote` is immutable once built. Raw quotes are created fresh from
//! every inbound ticker message; consolidated quotes carry the
//! `AGGREGATED_SOURCE` sentinel as their source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source value of every consolidated quote.
pub const AGGREGATED_SOURCE: &str = "aggregated";

/// One instrument's price/volume snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Canonical symbol (see `normalize_symbol`).
    pub symbol: String,
    /// Exchange name, or `"aggregated"` for a consolidated quote.
    pub source: String,
    pub price: f64,
    /// Best bid. Not guaranteed to be below `ask` on malformed feeds.
    pub bid: f64,
    pub ask: f64,
    /// 24h base volume.
    pub volume: f64,
    #[serde(rename = "high24h")]
    pub high_24h: f64,
    #[serde(rename = "low24h")]
    pub low_24h: f64,
    pub vwap: Option<f64>,
    pub open_interest: Option<f64>,
    /// `price` minus the exchange's reference price.
    pub change: f64,
    pub change_percent: f64,
    /// Ingestion time, used only for staleness.
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Whether this quote is a consolidated (cross-exchange) quote.
    pub fn is_aggregated(&self) -> bool {
        self.source == AGGREGATED_SOURCE
    }

    /// Age relative to `now`. Quotes stamped in the future have zero age.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_milliseconds().max(0)
    }

    /// Spread (`ask - bid`). Negative on a crossed book.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

/// Exchange-neutral ticker fields extracted by a normalizer.
///
/// `reference_price` is whatever the exchange reports as its change
/// baseline: 24h open on most venues, previous close on others.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub vwap: Option<f64>,
    pub open_interest: Option<f64>,
    pub reference_price: Option<f64>,
}

impl TickerSnapshot {
    /// Build a raw quote. The symbol is normalized and `change` is derived
    /// from `reference_price` (zero when the exchange reports none).
    pub fn into_quote(self, source: &str, observed_at: DateTime<Utc>) -> Quote {
        let (change, change_percent) = match self.reference_price {
            Some(reference) if reference > 0.0 => {
                let change = self.price - reference;
                (change, change / reference * 100.0)
            }
            _ => (0.0, 0.0),
        };

        Quote {
            symbol: crate::normalize_symbol(&self.symbol),
            source: source.to_string(),
            price: self.price,
            bid: self.bid,
            ask: self.ask,
            volume: self.volume,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            vwap: self.vwap,
            open_interest: self.open_interest,
            change,
            change_percent,
            observed_at,
        }
    }
}
