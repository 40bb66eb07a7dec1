//! Bybit v5 `tickers.{symbol}` topic.
//!
//! Format: `{"topic":"tickers.BTCUSDT","type":"snapshot","data":{"symbol":"BTCUSDT",
//! "lastPrice":"50000","bid1Price":"49999","ask1Price":"50001","volume24h":"1234",
//! "highPrice24h":"51000","lowPrice24h":"49000","prevPrice24h":"49500",
//! "openInterest":"8000"}}`.
//! Change is measured against the previous close (`prevPrice24h`), unlike
//! the 24h-open reference used by the other venues.

use super::{optional, required, text, validated};
use crate::error::{FeedError, FeedResult};
use serde_json::Value;
use tickerfuse_core::TickerSnapshot;

pub(crate) fn parse(raw: &Value) -> FeedResult<Option<TickerSnapshot>> {
    let is_ticker = raw
        .get("topic")
        .and_then(Value::as_str)
        .is_some_and(|topic| topic.starts_with("tickers."));
    if !is_ticker {
        return Ok(None);
    }

    let data = raw
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| FeedError::UnexpectedShape("tickers data is not an object".to_string()))?;

    // Deltas only carry changed fields; one without a last price adds nothing.
    let is_delta = raw.get("type").and_then(Value::as_str) == Some("delta");
    if is_delta && data.get("lastPrice").is_none() {
        return Ok(None);
    }

    validated(TickerSnapshot {
        symbol: text(data, "symbol")?.to_string(),
        price: required(data, "lastPrice")?,
        bid: optional(data, "bid1Price")?.unwrap_or_default(),
        ask: optional(data, "ask1Price")?.unwrap_or_default(),
        volume: optional(data, "volume24h")?.unwrap_or_default(),
        high_24h: optional(data, "highPrice24h")?.unwrap_or_default(),
        low_24h: optional(data, "lowPrice24h")?.unwrap_or_default(),
        vwap: None,
        open_interest: optional(data, "openInterest")?,
        reference_price: optional(data, "prevPrice24h")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_snapshot() {
        let raw = json!({
            "topic": "tickers.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000000000u64,
            "data": {
                "symbol": "BTCUSDT", "lastPrice": "50000", "bid1Price": "49999",
                "ask1Price": "50001", "volume24h": "1234", "highPrice24h": "51000",
                "lowPrice24h": "49000", "prevPrice24h": "49500", "openInterest": "8000"
            }
        });

        let snapshot = parse(&raw).unwrap().unwrap();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.open_interest, Some(8000.0));
        assert_eq!(snapshot.reference_price, Some(49500.0));
    }

    #[test]
    fn test_partial_delta_skipped() {
        let raw = json!({
            "topic": "tickers.BTCUSDT",
            "type": "delta",
            "data": {"symbol": "BTCUSDT", "openInterest": "8001"}
        });
        assert!(parse(&raw).unwrap().is_none());
    }

    #[test]
    fn test_control_messages_skipped() {
        assert!(parse(&json!({"op": "pong", "success": true})).unwrap().is_none());
        assert!(parse(&json!({"success": true, "op": "subscribe"})).unwrap().is_none());
    }
}
