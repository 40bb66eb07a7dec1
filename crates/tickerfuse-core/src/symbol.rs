//! Symbol normalization.
//!
//! Every exchange spells the same instrument differently ("BTC-USD",
//! "XBT/USD", "BTCUSDT"). The canonical form is uppercase with separators
//! stripped, `XBT` spelled `BTC` and `USDT` spelled `USD`, so quotes for
//! the same economic instrument compare equal across exchanges.

/// Quote currencies recognized when splitting a canonical symbol.
/// Longer suffixes come first so "USDC" is not read as "USD" + "C".
const QUOTE_CURRENCIES: &[&str] = &["USDC", "USD", "EUR", "GBP", "JPY", "BTC", "ETH"];

/// Normalize an exchange symbol into the canonical form.
///
/// Idempotent: `normalize_symbol(normalize_symbol(s)) == normalize_symbol(s)`.
pub fn normalize_symbol(raw: &str) -> String {
    let mut symbol: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != '/')
        .collect::<String>()
        .to_uppercase();

    if let Some(rest) = symbol.strip_prefix("XBT") {
        symbol = format!("BTC{rest}");
    }
    if symbol.ends_with("USDT") {
        symbol.truncate(symbol.len() - 1);
    }
    // Kraken also spells a BTC quote leg as XBT ("ETH/XBT").
    if symbol.len() > 3 && symbol.ends_with("XBT") {
        symbol.replace_range(symbol.len() - 3.., "BTC");
    }

    symbol
}

/// Split a canonical symbol into `(base, quote)`.
///
/// Returns `None` when no known quote currency terminates the symbol or the
/// base would be empty.
pub fn split_symbol(canonical: &str) -> Option<(&str, &str)> {
    QUOTE_CURRENCIES.iter().find_map(|quote| {
        canonical
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}
