//! tickerfuse - consolidated multi-exchange ticker feed.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tickerfuse::{AppConfig, FeedEvent, TickerFeed};
use tickerfuse_telemetry::Metrics;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Consolidated multi-exchange ticker feed
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKERFUSE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connection
    tickerfuse_ws::init_crypto();

    let args = Args::parse();

    // CLI arg > env var > default
    let config = AppConfig::load(args.config.as_deref())?;

    tickerfuse_telemetry::init_logging(&config.telemetry.log_level)?;
    info!("Starting tickerfuse v{}", env!("CARGO_PKG_VERSION"));
    match &config.source {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => warn!(
            config_path = %AppConfig::resolve_path(args.config.as_deref()),
            "Config file not found, using defaults"
        ),
    }

    let feed = TickerFeed::new(&config)?;
    let mut events = feed.events();
    feed.start();
    feed.subscribe(&config.symbols);
    info!(symbols = ?config.symbols, "Subscribed");

    let mut stats_interval =
        tokio::time::interval(Duration::from_secs(config.telemetry.stats_interval_secs.max(1)));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(FeedEvent::QuoteUpdated { symbol, quote }) => {
                    debug!(
                        %symbol,
                        price = quote.price,
                        bid = quote.bid,
                        ask = quote.ask,
                        volume = quote.volume,
                        "Consolidated quote"
                    );
                }
                Ok(FeedEvent::ExchangeConnected(name)) => info!(exchange = %name, "Exchange up"),
                Ok(FeedEvent::ExchangeDisconnected(name)) => warn!(exchange = %name, "Exchange down"),
                Ok(FeedEvent::ExchangeFailed(name)) => error!(exchange = %name, "Exchange failed"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },

            _ = stats_interval.tick() => {
                log_summary(&feed);
                write_metrics(config.telemetry.metrics_path.as_deref());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    feed.stop().await;
    info!("Final summary:");
    log_summary(&feed);
    write_metrics(config.telemetry.metrics_path.as_deref());

    Ok(())
}

fn log_summary(feed: &TickerFeed) {
    for (exchange, state) in feed.connection_states() {
        info!(
            %exchange,
            status = %state.status,
            reconnect_attempts = state.reconnect_attempts,
            last_message_at = ?state.last_message_at,
            "Exchange status"
        );
    }

    let mut quotes: Vec<_> = feed.get_all_quotes().into_iter().collect();
    quotes.sort_by(|a, b| a.0.cmp(&b.0));
    for (symbol, quote) in quotes {
        info!(
            %symbol,
            price = quote.price,
            bid = quote.bid,
            ask = quote.ask,
            change_pct = quote.change_percent,
            contributors = ?feed.contributors(&symbol),
            "Quote summary"
        );
    }
}

fn write_metrics(path: Option<&str>) {
    let Some(path) = path else {
        return;
    };
    match Metrics::render() {
        Ok(text) => {
            if let Err(e) = std::fs::write(path, text) {
                warn!(path, error = %e, "Failed to write metrics");
            }
        }
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }
}
