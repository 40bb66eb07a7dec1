//! Binance `24hrTicker` stream events.
//!
//! Format: `{"e":"24hrTicker","s":"BTCUSDT","c":"50000.00","b":"49999.99",
//! "a":"50000.01","v":"1234.5","h":"51000","l":"49000","o":"49500","w":"50010"}`.
//! Combined streams wrap the event as `{"stream":"btcusdt@ticker","data":{...}}`.
//! Change is measured against the rolling 24h open (`o`).

use super::{optional, required, text, validated};
use crate::error::FeedResult;
use serde_json::Value;
use tickerfuse_core::TickerSnapshot;

pub(crate) fn parse(raw: &Value) -> FeedResult<Option<TickerSnapshot>> {
    let event = match raw.get("data") {
        Some(inner) if raw.get("stream").is_some() => inner,
        _ => raw,
    };

    if event.get("e").and_then(Value::as_str) != Some("24hrTicker") {
        return Ok(None);
    }

    validated(TickerSnapshot {
        symbol: text(event, "s")?.to_string(),
        price: required(event, "c")?,
        bid: optional(event, "b")?.unwrap_or_default(),
        ask: optional(event, "a")?.unwrap_or_default(),
        volume: optional(event, "v")?.unwrap_or_default(),
        high_24h: optional(event, "h")?.unwrap_or_default(),
        low_24h: optional(event, "l")?.unwrap_or_default(),
        vwap: optional(event, "w")?,
        open_interest: None,
        reference_price: optional(event, "o")?,
    })
}
