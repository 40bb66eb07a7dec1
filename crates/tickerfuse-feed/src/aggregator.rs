//! Cross-exchange quote aggregation.
//!
//! Keeps the latest raw quote per (exchange, symbol) and derives one
//! consolidated quote per symbol from the fresh entries. All exchanges'
//! quotes for a symbol live behind the same lock, so a recomputation always
//! sees a consistent set of contributors and never touches other symbols.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tickerfuse_core::{Quote, AGGREGATED_SOURCE};
use tracing::{debug, trace, warn};

/// How contributing quotes are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Volume-weighted price, tightest bid/ask across venues, summed volume.
    #[default]
    BestPrice,
    /// Like `BestPrice`, but each venue contributes its own reported VWAP
    /// when it publishes one.
    Vwap,
    /// Copy the highest-priority fresh venue verbatim.
    Primary,
}

impl std::fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BestPrice => write!(f, "best_price"),
            Self::Vwap => write!(f, "vwap"),
            Self::Primary => write!(f, "primary"),
        }
    }
}

/// Aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub strategy: AggregationStrategy,
    /// Raw quotes older than this are left out of the consolidated quote.
    #[serde(default = "default_stale_data_threshold_ms")]
    pub stale_data_threshold_ms: u64,
    /// Maximum relative distance between the consolidated price and the
    /// plain mean of contributing prices (0.02 = 2%).
    #[serde(default = "default_price_deviation_threshold")]
    pub price_deviation_threshold: f64,
    /// Exchange priority for `Primary` and for carrying change fields.
    /// Lower wins; unlisted exchanges rank last.
    #[serde(skip)]
    pub priorities: HashMap<String, u32>,
}

fn default_stale_data_threshold_ms() -> u64 {
    5_000
}

fn default_price_deviation_threshold() -> f64 {
    0.02
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::default(),
            stale_data_threshold_ms: default_stale_data_threshold_ms(),
            price_deviation_threshold: default_price_deviation_threshold(),
            priorities: HashMap::new(),
        }
    }
}

impl AggregationConfig {
    pub fn with_priorities(mut self, priorities: HashMap<String, u32>) -> Self {
        self.priorities = priorities;
        self
    }

    fn priority(&self, exchange: &str) -> u32 {
        self.priorities.get(exchange).copied().unwrap_or(u32::MAX)
    }
}

/// Result of feeding one raw quote into the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    /// A new consolidated quote was stored.
    Published(Quote),
    /// The candidate strayed too far from the contributors' mean; the
    /// previous consolidated quote was kept.
    Rejected {
        candidate: Quote,
        mean: f64,
        deviation: f64,
    },
    /// No contributor for the symbol is fresh.
    NoFreshData,
    /// The input was itself a consolidated quote.
    Ignored,
}

impl AggregateOutcome {
    pub fn published(&self) -> Option<&Quote> {
        match self {
            Self::Published(quote) => Some(quote),
            _ => None,
        }
    }
}

/// Per-symbol state: latest raw quote per exchange plus the last published
/// consolidated quote.
#[derive(Debug, Default)]
struct SymbolBook {
    raw: HashMap<String, Quote>,
    consolidated: Option<Quote>,
}

type BookEntry = Arc<RwLock<SymbolBook>>;

/// Aggregation engine.
pub struct QuoteAggregator {
    config: AggregationConfig,
    books: DashMap<String, BookEntry>,
}

impl QuoteAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            books: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    fn get_or_create(&self, symbol: &str) -> BookEntry {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolBook::default())))
            .clone()
    }

    fn book(&self, symbol: &str) -> Option<BookEntry> {
        self.books.get(symbol).map(|entry| entry.clone())
    }

    /// Store a raw quote and recompute its symbol's consolidated quote.
    pub fn apply(&self, quote: Quote) -> AggregateOutcome {
        self.apply_at(quote, Utc::now())
    }

    /// Same as `apply`, with freshness judged against `now`.
    pub fn apply_at(&self, quote: Quote, now: DateTime<Utc>) -> AggregateOutcome {
        if quote.is_aggregated() {
            warn!(symbol = %quote.symbol, "Consolidated quote fed back as raw input, ignoring");
            return AggregateOutcome::Ignored;
        }

        let entry = self.get_or_create(&quote.symbol);
        let mut book = entry.write();
        trace!(symbol = %quote.symbol, exchange = %quote.source, price = quote.price, "Raw quote stored");
        book.raw.insert(quote.source.clone(), quote);
        self.recompute(&mut book, now)
    }

    fn is_fresh(&self, quote: &Quote, now: DateTime<Utc>) -> bool {
        let threshold = i64::try_from(self.config.stale_data_threshold_ms).unwrap_or(i64::MAX);
        quote.age_ms(now) <= threshold
    }

    fn recompute(&self, book: &mut SymbolBook, now: DateTime<Utc>) -> AggregateOutcome {
        let mut fresh: Vec<&Quote> = book.raw.values().filter(|q| self.is_fresh(q, now)).collect();
        if fresh.is_empty() {
            return AggregateOutcome::NoFreshData;
        }
        // Stable contributor order keeps float sums reproducible.
        fresh.sort_by(|a, b| a.source.cmp(&b.source));

        let candidate = match self.config.strategy {
            AggregationStrategy::BestPrice => self.blend(&fresh, false),
            AggregationStrategy::Vwap => self.blend(&fresh, true),
            AggregationStrategy::Primary => self.primary(&fresh),
        };

        let mean = fresh.iter().map(|q| q.price).sum::<f64>() / fresh.len() as f64;
        if mean > 0.0 {
            let deviation = (candidate.price - mean).abs() / mean;
            // NaN deviation comes from an overflowed blend.
            if deviation.is_nan() || deviation > self.config.price_deviation_threshold {
                warn!(
                    symbol = %candidate.symbol,
                    candidate = candidate.price,
                    mean,
                    deviation,
                    contributors = fresh.len(),
                    "Consolidated price rejected as outlier"
                );
                return AggregateOutcome::Rejected {
                    candidate,
                    mean,
                    deviation,
                };
            }
        }

        debug!(
            symbol = %candidate.symbol,
            price = candidate.price,
            bid = candidate.bid,
            ask = candidate.ask,
            contributors = fresh.len(),
            strategy = %self.config.strategy,
            "Consolidated quote published"
        );
        book.consolidated = Some(candidate.clone());
        AggregateOutcome::Published(candidate)
    }

    /// Highest-priority contributor; ties break by exchange name.
    fn anchor<'a>(&self, fresh: &[&'a Quote]) -> &'a Quote {
        fresh
            .iter()
            .copied()
            .min_by(|a, b| {
                self.config
                    .priority(&a.source)
                    .cmp(&self.config.priority(&b.source))
                    .then_with(|| a.source.cmp(&b.source))
            })
            .unwrap_or(fresh[0])
    }

    fn primary(&self, fresh: &[&Quote]) -> Quote {
        let mut quote = self.anchor(fresh).clone();
        quote.source = AGGREGATED_SOURCE.to_string();
        quote
    }

    fn blend(&self, fresh: &[&Quote], prefer_reported_vwap: bool) -> Quote {
        let input_price = |q: &Quote| {
            if prefer_reported_vwap {
                q.vwap.filter(|v| *v > 0.0).unwrap_or(q.price)
            } else {
                q.price
            }
        };

        let total_volume: f64 = fresh.iter().map(|q| q.volume.max(0.0)).sum();
        let price = if total_volume > 0.0 {
            fresh
                .iter()
                .map(|q| input_price(q) * q.volume.max(0.0))
                .sum::<f64>()
                / total_volume
        } else {
            fresh.iter().map(|q| input_price(q)).sum::<f64>() / fresh.len() as f64
        };

        let bid = fresh
            .iter()
            .map(|q| q.bid)
            .filter(|b| *b > 0.0)
            .fold(0.0, f64::max);
        let ask = positive_min(fresh.iter().map(|q| q.ask));
        let high_24h = fresh.iter().map(|q| q.high_24h).fold(0.0, f64::max);
        let low_24h = positive_min(fresh.iter().map(|q| q.low_24h));

        let open_interest = fresh
            .iter()
            .filter_map(|q| q.open_interest)
            .fold(None, |acc: Option<f64>, oi| Some(acc.unwrap_or(0.0) + oi));
        let observed_at = fresh
            .iter()
            .map(|q| q.observed_at)
            .max()
            .unwrap_or_else(Utc::now);

        let anchor = self.anchor(fresh);

        Quote {
            symbol: anchor.symbol.clone(),
            source: AGGREGATED_SOURCE.to_string(),
            price,
            bid,
            ask,
            volume: total_volume,
            high_24h,
            low_24h,
            vwap: Some(price),
            open_interest,
            change: anchor.change,
            change_percent: anchor.change_percent,
            observed_at,
        }
    }

    /// Latest published consolidated quote for `symbol`.
    pub fn latest(&self, symbol: &str) -> Option<Quote> {
        self.book(symbol)?.read().consolidated.clone()
    }

    /// Every symbol's latest consolidated quote.
    pub fn all_latest(&self) -> HashMap<String, Quote> {
        self.books
            .iter()
            .filter_map(|entry| {
                let quote = entry.value().read().consolidated.clone()?;
                Some((entry.key().clone(), quote))
            })
            .collect()
    }

    /// Latest raw quote from `exchange` for `symbol`, fresh or not.
    pub fn raw_latest(&self, exchange: &str, symbol: &str) -> Option<Quote> {
        self.book(symbol)?.read().raw.get(exchange).cloned()
    }

    /// Exchanges currently contributing fresh data for `symbol`, sorted.
    pub fn contributors(&self, symbol: &str, now: DateTime<Utc>) -> Vec<String> {
        let Some(entry) = self.book(symbol) else {
            return Vec::new();
        };
        let book = entry.read();
        let mut names: Vec<String> = book
            .raw
            .values()
            .filter(|q| self.is_fresh(q, now))
            .map(|q| q.source.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of symbols with any stored quote.
    pub fn symbol_count(&self) -> usize {
        self.books.len()
    }
}

impl Default for QuoteAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

fn positive_min(values: impl Iterator<Item = f64>) -> f64 {
    values
        .filter(|v| *v > 0.0)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tickerfuse_core::TickerSnapshot;

    fn quote(exchange: &str, symbol: &str, price: f64, volume: f64) -> Quote {
        quote_at(exchange, symbol, price, volume, Utc::now())
    }

    fn quote_at(
        exchange: &str,
        symbol: &str,
        price: f64,
        volume: f64,
        observed_at: DateTime<Utc>,
    ) -> Quote {
        TickerSnapshot {
            symbol: symbol.to_string(),
            price,
            bid: price - 1.0,
            ask: price + 1.0,
            volume,
            high_24h: price * 1.01,
            low_24h: price * 0.99,
            ..Default::default()
        }
        .into_quote(exchange, observed_at)
    }

    fn aggregator(strategy: AggregationStrategy) -> QuoteAggregator {
        QuoteAggregator::new(AggregationConfig {
            strategy,
            ..Default::default()
        })
    }

    #[test]
    fn test_vwap_weighting() {
        let agg = aggregator(AggregationStrategy::Vwap);
        agg.apply(quote("a", "BTCUSD", 100.0, 10.0));
        let outcome = agg.apply(quote("b", "BTCUSD", 110.0, 30.0));

        // (100*10 + 110*30) / 40
        let published = outcome.published().expect("should publish");
        assert!((published.price - 107.5).abs() < 1e-9);
        assert_eq!(published.source, AGGREGATED_SOURCE);
        assert_eq!(published.volume, 40.0);
    }

    #[test]
    fn test_vwap_prefers_reported_exchange_vwap() {
        let agg = aggregator(AggregationStrategy::Vwap);
        let mut a = quote("a", "BTCUSD", 100.0, 10.0);
        a.vwap = Some(101.0);
        agg.apply(a);
        let outcome = agg.apply(quote("b", "BTCUSD", 101.0, 10.0));
        assert!((outcome.published().unwrap().price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_best_price_takes_tightest_spread() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut a = quote("a", "ETHUSD", 3000.0, 5.0);
        a.bid = 2999.0;
        a.ask = 3003.0;
        let mut b = quote("b", "ETHUSD", 3001.0, 5.0);
        b.bid = 2998.0;
        b.ask = 3002.0;
        agg.apply(a);
        let published = agg.apply(b).published().cloned().unwrap();

        assert_eq!(published.bid, 2999.0);
        assert_eq!(published.ask, 3002.0);
        assert!((published.price - 3000.5).abs() < 1e-9);
        assert!((published.high_24h - 3001.0 * 1.01).abs() < 1e-9);
        assert!((published.low_24h - 3000.0 * 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_zero_volume_falls_back_to_mean() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        agg.apply(quote("a", "BTCUSD", 100.0, 0.0));
        let outcome = agg.apply(quote("b", "BTCUSD", 101.0, 0.0));
        assert!((outcome.published().unwrap().price - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_crossed_book_tolerated() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut a = quote("a", "BTCUSD", 100.0, 1.0);
        a.bid = 102.0;
        a.ask = 98.0;
        let published = agg.apply(a).published().cloned().unwrap();
        assert_eq!(published.bid, 102.0);
        assert_eq!(published.ask, 98.0);
    }

    #[test]
    fn test_missing_sides_ignored() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut a = quote("a", "BTCUSD", 100.0, 1.0);
        a.ask = 0.0;
        let mut b = quote("b", "BTCUSD", 100.0, 1.0);
        b.bid = 0.0;
        b.ask = 100.5;
        agg.apply(a);
        let published = agg.apply(b).published().cloned().unwrap();
        assert_eq!(published.bid, 99.0);
        assert_eq!(published.ask, 100.5);
    }

    #[test]
    fn test_primary_uses_highest_priority() {
        let priorities = HashMap::from([("kraken".to_string(), 1), ("binance".to_string(), 2)]);
        let agg = QuoteAggregator::new(
            AggregationConfig {
                strategy: AggregationStrategy::Primary,
                ..Default::default()
            }
            .with_priorities(priorities),
        );

        agg.apply(quote("binance", "BTCUSD", 100.0, 50.0));
        let published = agg
            .apply(quote("kraken", "BTCUSD", 101.0, 1.0))
            .published()
            .cloned()
            .unwrap();

        assert_eq!(published.price, 101.0);
        assert_eq!(published.volume, 1.0);
        assert_eq!(published.source, AGGREGATED_SOURCE);
    }

    #[test]
    fn test_primary_falls_back_when_primary_stale() {
        let priorities = HashMap::from([("kraken".to_string(), 1), ("binance".to_string(), 2)]);
        let agg = QuoteAggregator::new(
            AggregationConfig {
                strategy: AggregationStrategy::Primary,
                ..Default::default()
            }
            .with_priorities(priorities),
        );
        let now = Utc::now();

        agg.apply_at(
            quote_at("kraken", "BTCUSD", 101.0, 1.0, now - Duration::seconds(30)),
            now,
        );
        let outcome = agg.apply_at(quote_at("binance", "BTCUSD", 100.0, 5.0, now), now);
        assert_eq!(outcome.published().unwrap().price, 100.0);
    }

    #[test]
    fn test_outlier_rejection_keeps_previous() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        agg.apply(quote("a", "BTCUSD", 100.0, 10.0));
        agg.apply(quote("b", "BTCUSD", 101.0, 10.0));
        let before = agg.latest("BTCUSD").unwrap();
        assert!((before.price - 100.5).abs() < 1e-9);

        let outcome = agg.apply(quote("c", "BTCUSD", 500.0, 1000.0));
        assert!(matches!(outcome, AggregateOutcome::Rejected { .. }));
        assert_eq!(agg.latest("BTCUSD").unwrap(), before);
    }

    #[test]
    fn test_outlier_rejected_with_no_prior_quote() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let t0 = Utc::now();
        let later = t0 + Duration::seconds(60);

        // Store two venues without publishing: judged at `later` they are stale.
        assert_eq!(
            agg.apply_at(quote_at("a", "BTCUSD", 100.0, 10.0, t0), later),
            AggregateOutcome::NoFreshData
        );
        assert_eq!(
            agg.apply_at(quote_at("b", "BTCUSD", 101.0, 10.0, t0), later),
            AggregateOutcome::NoFreshData
        );

        // Judged at t0 all three contribute; the volume-heavy 500 drags the
        // candidate far from the plain mean.
        let outcome = agg.apply_at(quote_at("c", "BTCUSD", 500.0, 1000.0, t0), t0);
        match outcome {
            AggregateOutcome::Rejected { mean, deviation, .. } => {
                assert!((mean - 233.666_666).abs() < 1e-3);
                assert!(deviation > 0.02);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(agg.latest("BTCUSD").is_none());
    }

    #[test]
    fn test_overflowing_volume_is_rejected() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        agg.apply(quote("a", "BTCUSD", 100.0, 1e308));
        let outcome = agg.apply(quote("b", "BTCUSD", 101.0, 1e308));

        match outcome {
            AggregateOutcome::Rejected { candidate, .. } => assert!(candidate.price.is_nan()),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(agg.latest("BTCUSD").is_none());
    }

    #[test]
    fn test_huge_stale_threshold_keeps_quotes_fresh() {
        let agg = QuoteAggregator::new(AggregationConfig {
            stale_data_threshold_ms: u64::MAX,
            ..Default::default()
        });
        let now = Utc::now();
        let outcome = agg.apply_at(
            quote_at("a", "BTCUSD", 100.0, 1.0, now - Duration::hours(1)),
            now,
        );
        assert_eq!(outcome.published().unwrap().price, 100.0);
    }

    #[test]
    fn test_stale_only_quote_produces_nothing() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let now = Utc::now();
        let outcome = agg.apply_at(
            quote_at("a", "BTCUSD", 100.0, 1.0, now - Duration::seconds(10)),
            now,
        );

        assert_eq!(outcome, AggregateOutcome::NoFreshData);
        assert!(agg.latest("BTCUSD").is_none());
        // Raw quote is retained, just excluded.
        assert!(agg.raw_latest("a", "BTCUSD").is_some());
        assert!(agg.contributors("BTCUSD", now).is_empty());
    }

    #[test]
    fn test_stale_contributor_excluded_then_revived() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let now = Utc::now();
        agg.apply_at(quote_at("a", "BTCUSD", 200.0, 1.0, now - Duration::seconds(10)), now);
        let outcome = agg.apply_at(quote_at("b", "BTCUSD", 100.0, 1.0, now), now);
        assert_eq!(outcome.published().unwrap().price, 100.0);

        let outcome = agg.apply_at(quote_at("a", "BTCUSD", 101.0, 1.0, now), now);
        assert!((outcome.published().unwrap().price - 100.5).abs() < 1e-9);
        assert_eq!(agg.contributors("BTCUSD", now), vec!["a", "b"]);
    }

    #[test]
    fn test_symbols_are_isolated() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        agg.apply(quote("a", "ETHUSD", 3000.0, 1.0));
        let eth = agg.latest("ETHUSD").unwrap();

        agg.apply(quote("a", "BTCUSD", 50000.0, 1.0));
        agg.apply(quote("b", "BTCUSD", 50010.0, 3.0));
        agg.apply(quote("c", "BTCUSD", 90000.0, 100.0));

        assert_eq!(agg.latest("ETHUSD").unwrap(), eth);
        assert_eq!(agg.all_latest().len(), 2);
        assert_eq!(agg.symbol_count(), 2);
    }

    #[test]
    fn test_two_exchange_best_price_scenario() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut a = quote("exchange-a", "BTCUSD", 50000.0, 5.0);
        a.bid = 49995.0;
        a.ask = 50004.0;
        let mut b = quote("exchange-b", "BTCUSD", 50010.0, 15.0);
        b.bid = 49998.0;
        b.ask = 50012.0;

        agg.apply(a);
        let published = agg.apply(b).published().cloned().unwrap();

        assert!((published.price - 50007.5).abs() < 1e-6);
        assert_eq!(published.bid, 49998.0);
        assert_eq!(published.ask, 50004.0);
        assert_eq!(published.volume, 20.0);
    }

    #[test]
    fn test_aggregated_input_ignored() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut q = quote("a", "BTCUSD", 100.0, 1.0);
        q.source = AGGREGATED_SOURCE.to_string();
        assert_eq!(agg.apply(q), AggregateOutcome::Ignored);
        assert_eq!(agg.symbol_count(), 0);
    }

    #[test]
    fn test_open_interest_summed_when_reported() {
        let agg = aggregator(AggregationStrategy::BestPrice);
        let mut a = quote("a", "BTCUSD", 100.0, 1.0);
        a.open_interest = Some(10.0);
        let mut b = quote("b", "BTCUSD", 100.0, 1.0);
        b.open_interest = Some(5.0);
        agg.apply(a);
        agg.apply(b);
        agg.apply(quote("c", "BTCUSD", 100.0, 1.0));
        assert_eq!(agg.latest("BTCUSD").unwrap().open_interest, Some(15.0));

        agg.apply(quote("a", "SOLUSD", 100.0, 1.0));
        assert_eq!(agg.latest("SOLUSD").unwrap().open_interest, None);
    }
}
