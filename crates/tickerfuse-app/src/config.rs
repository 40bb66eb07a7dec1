//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tickerfuse_core::ExchangeKind;
use tickerfuse_feed::AggregationConfig;
use tickerfuse_ws::connection::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_BASE_DELAY_MS,
};
use tickerfuse_ws::ConnectionConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TICKERFUSE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// One configured exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// Unique name, reported as the quote source.
    pub name: String,
    /// Wire protocol.
    pub kind: ExchangeKind,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower wins for the `primary` strategy.
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// 0 = retry forever.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_reconnect_base_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

impl ExchangeSettings {
    pub fn new(name: impl Into<String>, kind: ExchangeKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            enabled: default_enabled(),
            priority: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl From<ExchangeSettings> for ConnectionConfig {
    fn from(cfg: ExchangeSettings) -> Self {
        Self {
            name: cfg.name,
            kind: cfg.kind,
            url: cfg.url,
            symbols: Vec::new(), // Subscribed through the feed
            priority: cfg.priority,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
        }
    }
}

/// Logging and periodic reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Period of the binary's quote/status summary.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    /// When set, the binary rewrites this file with the Prometheus text
    /// exposition on every summary tick.
    #[serde(default)]
    pub metrics_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval_secs(),
            metrics_path: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Symbols subscribed at startup, in any exchange's spelling.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Capacity of the raw quote channel between connections and the aggregator.
    #[serde(default = "default_quote_channel_capacity")]
    pub quote_channel_capacity: usize,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeSettings>,
    /// File this config was read from; `None` when built from defaults.
    #[serde(skip)]
    pub source: Option<String>,
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSD".to_string(), "ETHUSD".to_string()]
}

fn default_quote_channel_capacity() -> usize {
    4096
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_exchanges() -> Vec<ExchangeSettings> {
    let exchange = |name: &str, kind, url: &str, priority| ExchangeSettings {
        priority,
        ..ExchangeSettings::new(name, kind, url)
    };
    vec![
        exchange("binance", ExchangeKind::Binance, "wss://stream.binance.com:9443/ws", 1),
        exchange("coinbase", ExchangeKind::Coinbase, "wss://ws-feed.exchange.coinbase.com", 2),
        exchange("kraken", ExchangeKind::Kraken, "wss://ws.kraken.com", 3),
        exchange("bybit", ExchangeKind::Bybit, "wss://stream.bybit.com/v5/public/spot", 4),
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            aggregation: AggregationConfig::default(),
            telemetry: TelemetryConfig::default(),
            quote_channel_capacity: default_quote_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
            exchanges: default_exchanges(),
            source: None,
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit override, else `TICKERFUSE_CONFIG`,
    /// else `config/default.toml`.
    pub fn resolve_path(path_override: Option<&str>) -> String {
        path_override
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from the resolved path, falling back to defaults when the file
    /// does not exist. `source` records which file was read.
    pub fn load(path_override: Option<&str>) -> AppResult<Self> {
        let config_path = Self::resolve_path(path_override);

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let mut config = Self::from_toml(&content)?;
        config.source = Some(path.to_string());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeSettings> {
        self.exchanges.iter().filter(|e| e.enabled)
    }

    /// Reject configurations the feed cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(AppError::Config(msg));

        if self.enabled_exchanges().next().is_none() {
            return invalid("no enabled exchanges".to_string());
        }

        let mut names = HashSet::new();
        for exchange in &self.exchanges {
            if exchange.name.trim().is_empty() {
                return invalid("exchange with empty name".to_string());
            }
            if !names.insert(exchange.name.as_str()) {
                return invalid(format!("duplicate exchange name: {}", exchange.name));
            }
            if exchange.url.trim().is_empty() {
                return invalid(format!("{}: empty url", exchange.name));
            }
            if exchange.heartbeat_interval_ms == 0 {
                return invalid(format!("{}: heartbeat_interval_ms must be positive", exchange.name));
            }
        }

        let threshold = self.aggregation.price_deviation_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!(
                "price_deviation_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.aggregation.stale_data_threshold_ms == 0 {
            return invalid("stale_data_threshold_ms must be positive".to_string());
        }
        if self.quote_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return invalid("channel capacities must be positive".to_string());
        }

        Ok(())
    }

    /// Connection configs for every enabled exchange.
    pub fn connection_configs(&self) -> Vec<ConnectionConfig> {
        self.enabled_exchanges()
            .cloned()
            .map(ConnectionConfig::from)
            .collect()
    }

    /// Aggregation config with the exchange priority table filled in.
    pub fn aggregation_config(&self) -> AggregationConfig {
        let priorities: HashMap<String, u32> = self
            .enabled_exchanges()
            .map(|e| (e.name.clone(), e.priority))
            .collect();
        self.aggregation.clone().with_priorities(priorities)
    }
}
