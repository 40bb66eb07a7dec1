//! Kraken (WebSocket v1) ticker messages.
//!
//! Format: `[channelId, {"a":[px,wholeLot,lot],"b":[px,wholeLot,lot],
//! "c":[px,lot],"v":[today,24h],"p":[today,24h],"h":[today,24h],
//! "l":[today,24h],"o":[today,24h]}, "ticker", "XBT/USD"]`.
//! Objects (`systemStatus`, `subscriptionStatus`, `heartbeat`) are control
//! traffic. Change is measured against the rolling 24h open (`o[1]`).

use super::{number, validated};
use crate::error::{FeedError, FeedResult};
use serde_json::Value;
use tickerfuse_core::TickerSnapshot;

pub(crate) fn parse(raw: &Value) -> FeedResult<Option<TickerSnapshot>> {
    let Some(frame) = raw.as_array() else {
        return Ok(None);
    };
    if frame.len() < 4 {
        return Ok(None);
    }

    let channel = frame[frame.len() - 2].as_str().unwrap_or_default();
    if !channel.starts_with("ticker") {
        return Ok(None);
    }

    let pair = frame[frame.len() - 1]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or(FeedError::MissingField("pair"))?;
    let payload = &frame[1];
    if !payload.is_object() {
        return Err(FeedError::UnexpectedShape("ticker payload is not an object".to_string()));
    }

    validated(TickerSnapshot {
        symbol: pair.to_string(),
        price: level(payload, "c", 0)?,
        bid: optional_level(payload, "b", 0)?.unwrap_or_default(),
        ask: optional_level(payload, "a", 0)?.unwrap_or_default(),
        volume: optional_level(payload, "v", 1)?.unwrap_or_default(),
        high_24h: optional_level(payload, "h", 1)?.unwrap_or_default(),
        low_24h: optional_level(payload, "l", 1)?.unwrap_or_default(),
        vwap: optional_level(payload, "p", 1)?,
        open_interest: None,
        reference_price: optional_level(payload, "o", 1)?,
    })
}

fn level(payload: &Value, key: &'static str, index: usize) -> FeedResult<f64> {
    optional_level(payload, key, index)?.ok_or(FeedError::MissingField(key))
}

fn optional_level(payload: &Value, key: &'static str, index: usize) -> FeedResult<Option<f64>> {
    match payload.get(key) {
        None => Ok(None),
        Some(Value::Array(values)) => match values.get(index) {
            Some(value) => number(value, key).map(Some),
            None => Ok(None),
        },
        Some(other) => number(other, key).map(Some),
    }
}
