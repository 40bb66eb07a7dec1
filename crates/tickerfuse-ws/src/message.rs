//! Outbound command construction.
//!
//! Every exchange takes one JSON command per symbol batch. Symbols are
//! passed in canonical form and mapped to the exchange's spelling here.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tickerfuse_core::ExchangeKind;

/// Builds subscribe/unsubscribe/ping frames for one exchange protocol.
#[derive(Debug)]
pub struct CommandBuilder {
    kind: ExchangeKind,
    /// Binance requires a request id on every command.
    next_id: AtomicU64,
}

impl CommandBuilder {
    pub fn new(kind: ExchangeKind) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Subscribe command for a batch, `None` for an empty batch.
    pub fn subscribe(&self, symbols: &[String]) -> Option<String> {
        self.command(true, symbols)
    }

    /// Unsubscribe command for a batch, `None` for an empty batch.
    pub fn unsubscribe(&self, symbols: &[String]) -> Option<String> {
        self.command(false, symbols)
    }

    /// Application-level ping, for exchanges that define one.
    pub fn ping(&self) -> Option<String> {
        match self.kind {
            ExchangeKind::Kraken => Some(json!({"event": "ping"}).to_string()),
            ExchangeKind::Bybit => Some(json!({"op": "ping"}).to_string()),
            ExchangeKind::Binance | ExchangeKind::Coinbase => None,
        }
    }

    fn command(&self, subscribe: bool, symbols: &[String]) -> Option<String> {
        if symbols.is_empty() {
            return None;
        }
        let native: Vec<String> = symbols
            .iter()
            .map(|s| self.kind.native_symbol(s))
            .collect();

        let value: Value = match self.kind {
            ExchangeKind::Binance => json!({
                "method": if subscribe { "SUBSCRIBE" } else { "UNSUBSCRIBE" },
                "params": native.iter().map(|s| format!("{s}@ticker")).collect::<Vec<_>>(),
                "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            }),
            ExchangeKind::Coinbase => json!({
                "type": if subscribe { "subscribe" } else { "unsubscribe" },
                "product_ids": native,
                "channels": ["ticker"],
            }),
            ExchangeKind::Kraken => json!({
                "event": if subscribe { "subscribe" } else { "unsubscribe" },
                "pair": native,
                "subscription": {"name": "ticker"},
            }),
            ExchangeKind::Bybit => json!({
                "op": if subscribe { "subscribe" } else { "unsubscribe" },
                "args": native.iter().map(|s| format!("tickers.{s}")).collect::<Vec<_>>(),
            }),
        };
        Some(value.to_string())
    }
}
