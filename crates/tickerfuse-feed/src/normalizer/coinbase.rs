//! Coinbase Exchange `ticker` channel messages.
//!
//! Format: `{"type":"ticker","product_id":"BTC-USD","price":"50000.00",
//! "best_bid":"49999.99","best_ask":"50000.01","volume_24h":"1234.5",
//! "high_24h":"51000","low_24h":"49000","open_24h":"49500"}`.
//! Change is measured against `open_24h`.

use super::{optional, required, text, validated};
use crate::error::FeedResult;
use serde_json::Value;
use tickerfuse_core::TickerSnapshot;

pub(crate) fn parse(raw: &Value) -> FeedResult<Option<TickerSnapshot>> {
    if raw.get("type").and_then(Value::as_str) != Some("ticker") {
        return Ok(None);
    }

    validated(TickerSnapshot {
        symbol: text(raw, "product_id")?.to_string(),
        price: required(raw, "price")?,
        bid: optional(raw, "best_bid")?.unwrap_or_default(),
        ask: optional(raw, "best_ask")?.unwrap_or_default(),
        volume: optional(raw, "volume_24h")?.unwrap_or_default(),
        high_24h: optional(raw, "high_24h")?.unwrap_or_default(),
        low_24h: optional(raw, "low_24h")?.unwrap_or_default(),
        vwap: None,
        open_interest: None,
        reference_price: optional(raw, "open_24h")?,
    })
}
