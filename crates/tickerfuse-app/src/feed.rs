//! Consolidated ticker feed.
//!
//! `TickerFeed` owns the connection supervisor and the aggregator, and
//! wires them together with two pump tasks:
//! - quote pump: raw quotes from every connection into the aggregator
//! - status pump: connection status changes into metrics and events
//!
//! Consumers read consolidated quotes directly or follow the event stream.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tickerfuse_core::{normalize_symbol, Quote};
use tickerfuse_feed::{AggregateOutcome, QuoteAggregator};
use tickerfuse_telemetry::Metrics;
use tickerfuse_ws::{
    ConnectionStatus, ConnectionSupervisor, ExchangeConnectionState, StatusChange,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Notification published by the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A new consolidated quote was published.
    QuoteUpdated { symbol: String, quote: Quote },
    ExchangeConnected(String),
    /// An exchange left `Connected` (it may be reconnecting).
    ExchangeDisconnected(String),
    /// An exchange exhausted its reconnection attempts.
    ExchangeFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

pub struct TickerFeed {
    aggregator: Arc<QuoteAggregator>,
    supervisor: ConnectionSupervisor,
    events: broadcast::Sender<FeedEvent>,
    quote_rx: Mutex<Option<mpsc::Receiver<Quote>>>,
    status_rx: Mutex<Option<mpsc::UnboundedReceiver<StatusChange>>>,
    shutdown_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl TickerFeed {
    /// Build a feed from a validated configuration. Nothing connects until
    /// `start()`.
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;

        let (quote_tx, quote_rx) = mpsc::channel(config.quote_channel_capacity);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_channel_capacity);

        let supervisor = ConnectionSupervisor::new(config.connection_configs(), quote_tx, status_tx)?;
        let aggregator = Arc::new(QuoteAggregator::new(config.aggregation_config()));

        info!(
            exchanges = ?supervisor.names(),
            strategy = %config.aggregation.strategy,
            "Ticker feed created"
        );

        Ok(Self {
            aggregator,
            supervisor,
            events,
            quote_rx: Mutex::new(Some(quote_rx)),
            status_rx: Mutex::new(Some(status_rx)),
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    /// Start the pumps and every exchange connection. Idempotent; a stopped
    /// feed stays stopped.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running => {
                debug!("start() ignored, feed already running");
                return;
            }
            Lifecycle::Stopped => {
                warn!("start() ignored, feed was stopped");
                return;
            }
        }

        let (Some(quote_rx), Some(status_rx)) =
            (self.quote_rx.lock().take(), self.status_rx.lock().take())
        else {
            error!("Feed channels already consumed");
            return;
        };
        *lifecycle = Lifecycle::Running;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(pump_quotes(
            quote_rx,
            self.aggregator.clone(),
            self.events.clone(),
            self.shutdown_token.clone(),
        )));
        tasks.push(tokio::spawn(pump_status(
            status_rx,
            self.events.clone(),
            self.shutdown_token.clone(),
        )));

        self.supervisor.connect_all();
        info!("Ticker feed started");
    }

    /// Close every socket and wait for every background task. Terminal.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }
        info!("Stopping ticker feed");

        self.supervisor.shutdown_all().await;
        // Pumps go last so the final status changes are still published.
        self.shutdown_token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Feed task ended abnormally");
            }
        }
        info!("Ticker feed stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Subscribe every exchange to `symbols` (any exchange's spelling).
    pub fn subscribe(&self, symbols: &[String]) {
        self.supervisor.subscribe(symbols);
    }

    pub fn unsubscribe(&self, symbols: &[String]) {
        self.supervisor.unsubscribe(symbols);
    }

    /// Latest consolidated quote, or the last known one if every exchange
    /// has gone stale.
    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.aggregator.latest(&normalize_symbol(symbol))
    }

    pub fn get_all_quotes(&self) -> HashMap<String, Quote> {
        self.aggregator.all_latest()
    }

    /// Latest raw quote from one exchange.
    pub fn raw_quote(&self, exchange: &str, symbol: &str) -> Option<Quote> {
        self.aggregator.raw_latest(exchange, &normalize_symbol(symbol))
    }

    /// Exchanges with fresh data for `symbol` right now.
    pub fn contributors(&self, symbol: &str) -> Vec<String> {
        self.aggregator
            .contributors(&normalize_symbol(symbol), Utc::now())
    }

    pub fn connection_status(&self) -> BTreeMap<String, ConnectionStatus> {
        self.supervisor.status_snapshot()
    }

    pub fn connection_states(&self) -> BTreeMap<String, ExchangeConnectionState> {
        self.supervisor.states()
    }

    /// Manually reconnect one exchange, typically after `ExchangeFailed`.
    pub fn retry_exchange(&self, name: &str) -> AppResult<()> {
        if !self.is_running() {
            return Err(AppError::NotRunning);
        }
        self.supervisor.retry(name)?;
        Ok(())
    }

    /// New receiver on the event stream. Slow receivers lag, they never
    /// block the feed.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }
}

async fn pump_quotes(
    mut quote_rx: mpsc::Receiver<Quote>,
    aggregator: Arc<QuoteAggregator>,
    events: broadcast::Sender<FeedEvent>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            quote = quote_rx.recv() => match quote {
                Some(quote) => handle_quote(&aggregator, &events, quote),
                None => break,
            },
        }
    }
    debug!("Quote pump stopped");
}

fn handle_quote(
    aggregator: &QuoteAggregator,
    events: &broadcast::Sender<FeedEvent>,
    quote: Quote,
) {
    let symbol = quote.symbol.clone();
    let delay_ms = (Utc::now() - quote.observed_at)
        .num_microseconds()
        .map_or(0.0, |us| us as f64 / 1000.0);
    Metrics::raw_quote(&quote.source, delay_ms);

    match aggregator.apply(quote) {
        AggregateOutcome::Published(consolidated) => {
            let spread_bps = (consolidated.bid > 0.0 && consolidated.ask > 0.0)
                .then(|| consolidated.spread() / consolidated.price * 10_000.0);
            Metrics::published(&symbol, spread_bps);
            // No receivers is fine.
            let _ = events.send(FeedEvent::QuoteUpdated {
                symbol,
                quote: consolidated,
            });
        }
        AggregateOutcome::Rejected { .. } => Metrics::outlier_rejected(&symbol),
        AggregateOutcome::NoFreshData => Metrics::no_fresh_data(&symbol),
        AggregateOutcome::Ignored => {}
    }
}

async fn pump_status(
    mut status_rx: mpsc::UnboundedReceiver<StatusChange>,
    events: broadcast::Sender<FeedEvent>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            change = status_rx.recv() => match change {
                Some(change) => handle_status(&events, change),
                None => break,
            },
        }
    }
    while let Ok(change) = status_rx.try_recv() {
        handle_status(&events, change);
    }
    debug!("Status pump stopped");
}

fn handle_status(events: &broadcast::Sender<FeedEvent>, change: StatusChange) {
    Metrics::exchange_state(&change.exchange, &change.status.to_string());

    let mut published = Vec::new();
    if change.previous == ConnectionStatus::Connected {
        published.push(FeedEvent::ExchangeDisconnected(change.exchange.clone()));
    }
    match change.status {
        ConnectionStatus::Connected => {
            info!(exchange = %change.exchange, "Exchange connected");
            published.push(FeedEvent::ExchangeConnected(change.exchange.clone()));
        }
        ConnectionStatus::Reconnecting => {
            Metrics::reconnect(&change.exchange);
        }
        ConnectionStatus::Failed => {
            error!(
                exchange = %change.exchange,
                attempts = change.reconnect_attempts,
                "Exchange failed, coverage lost until manual retry"
            );
            Metrics::exchange_failed(&change.exchange);
            published.push(FeedEvent::ExchangeFailed(change.exchange.clone()));
        }
        ConnectionStatus::Connecting | ConnectionStatus::Disconnected => {}
    }

    for event in published {
        let _ = events.send(event);
    }
}
