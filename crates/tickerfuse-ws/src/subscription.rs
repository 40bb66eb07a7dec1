//! Subscribed-symbol tracking for one exchange connection.
//!
//! The registry is the source of truth for what gets restored after a
//! reconnection, so symbols are recorded whether or not the socket is open.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tickerfuse_core::normalize_symbol;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    symbols: RwLock<BTreeSet<String>>,
    /// Last quote received per symbol.
    last_quote: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbols(symbols: &[String]) -> Self {
        let registry = Self::new();
        registry.add(symbols);
        registry
    }

    /// Record symbols (normalized). Returns the ones not already present.
    pub fn add(&self, symbols: &[String]) -> Vec<String> {
        let mut set = self.symbols.write();
        let added: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty())
            .filter(|s| set.insert(s.clone()))
            .collect();
        if !added.is_empty() {
            debug!(?added, total = set.len(), "Symbols added");
        }
        added
    }

    /// Forget symbols (normalized). Returns the ones that were present.
    pub fn remove(&self, symbols: &[String]) -> Vec<String> {
        let mut set = self.symbols.write();
        let removed: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| set.remove(s))
            .collect();
        if !removed.is_empty() {
            let mut last_quote = self.last_quote.write();
            for symbol in &removed {
                last_quote.remove(symbol);
            }
            debug!(?removed, total = set.len(), "Symbols removed");
        }
        removed
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    /// Snapshot in sorted order.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }

    pub fn record_quote(&self, symbol: &str, at: DateTime<Utc>) {
        self.last_quote.write().insert(symbol.to_string(), at);
    }

    pub fn last_quote_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_quote.read().get(symbol).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_normalizes_and_dedups() {
        let reg = SubscriptionRegistry::new();
        let added = reg.add(&syms(&["BTC-USD", "XBT/USD", "eth-usd"]));
        assert_eq!(added, syms(&["BTCUSD", "ETHUSD"]));
        assert_eq!(reg.symbols(), syms(&["BTCUSD", "ETHUSD"]));

        assert!(reg.add(&syms(&["BTCUSDT"])).is_empty());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_remove_reports_only_present() {
        let reg = SubscriptionRegistry::with_symbols(&syms(&["BTCUSD", "ETHUSD"]));
        reg.record_quote("BTCUSD", Utc::now());

        let removed = reg.remove(&syms(&["BTC-USD", "SOLUSD"]));
        assert_eq!(removed, syms(&["BTCUSD"]));
        assert!(!reg.contains("BTCUSD"));
        assert!(reg.last_quote_at("BTCUSD").is_none());
        assert!(reg.contains("ETHUSD"));
    }

    #[test]
    fn test_empty_symbols_ignored() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.add(&syms(&["", "  "])).is_empty());
        assert!(reg.is_empty());
    }
}
