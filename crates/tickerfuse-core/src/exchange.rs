//! Supported exchange wire protocols.

use crate::error::CoreError;
use crate::symbol::split_symbol;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wire protocol spoken by a configured exchange.
///
/// The set is closed: each variant has its own normalizer and its own
/// subscribe/unsubscribe command shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Binance,
    Coinbase,
    Kraken,
    Bybit,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 4] = [Self::Binance, Self::Coinbase, Self::Kraken, Self::Bybit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Coinbase => "coinbase",
            Self::Kraken => "kraken",
            Self::Bybit => "bybit",
        }
    }

    /// Map a canonical symbol ("BTCUSD") to this exchange's spelling.
    ///
    /// Symbols that cannot be split into base/quote are passed through.
    pub fn native_symbol(&self, canonical: &str) -> String {
        let Some((base, quote)) = split_symbol(canonical) else {
            return match self {
                Self::Binance => canonical.to_lowercase(),
                _ => canonical.to_string(),
            };
        };

        match self {
            Self::Binance => format!("{base}{}", tether_quote(quote)).to_lowercase(),
            Self::Bybit => format!("{base}{}", tether_quote(quote)),
            Self::Coinbase => format!("{base}-{quote}"),
            Self::Kraken => {
                let base = if base == "BTC" { "XBT" } else { base };
                let quote = if quote == "BTC" { "XBT" } else { quote };
                format!("{base}/{quote}")
            }
        }
    }
}

fn tether_quote(quote: &str) -> &str {
    if quote == "USD" {
        "USDT"
    } else {
        quote
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| CoreError::UnknownExchange(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize_symbol;

    #[test]
    fn test_native_symbols() {
        assert_eq!(ExchangeKind::Binance.native_symbol("BTCUSD"), "btcusdt");
        assert_eq!(ExchangeKind::Bybit.native_symbol("BTCUSD"), "BTCUSDT");
        assert_eq!(ExchangeKind::Coinbase.native_symbol("BTCUSD"), "BTC-USD");
        assert_eq!(ExchangeKind::Kraken.native_symbol("BTCUSD"), "XBT/USD");
        assert_eq!(ExchangeKind::Kraken.native_symbol("ETHBTC"), "ETH/XBT");
    }

    #[test]
    fn test_native_symbol_round_trips_through_normalization() {
        for kind in ExchangeKind::ALL {
            for canonical in ["BTCUSD", "ETHUSD", "SOLEUR", "ETHBTC"] {
                let native = kind.native_symbol(canonical);
                assert_eq!(normalize_symbol(&native), canonical, "{kind} {native}");
            }
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!("Kraken".parse::<ExchangeKind>().unwrap(), ExchangeKind::Kraken);
        assert!("ftx".parse::<ExchangeKind>().is_err());
    }
}
