//! Exchange WebSocket connection.
//!
//! Handles the connection lifecycle for one exchange: linear reconnection
//! backoff, a terminal `Failed` state, staleness detection, and subscription
//! restore after every reconnection. Normalized quotes and status changes
//! leave the connection over channels.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::message::CommandBuilder;
use crate::subscription::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerfuse_core::{ExchangeKind, Quote};
use tickerfuse_feed::Normalizer;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
const OUTBOUND_CAPACITY: usize = 64;

/// Connection configuration for one exchange.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Unique exchange name, used as `Quote::source`.
    pub name: String,
    pub kind: ExchangeKind,
    /// WebSocket URL.
    pub url: String,
    /// Symbols subscribed on first connect.
    pub symbols: Vec<String>,
    /// Lower wins.
    pub priority: u32,
    /// Backoff step: attempt `n` waits `n * reconnect_base_delay_ms`.
    pub reconnect_base_delay_ms: u64,
    /// Consecutive failures before `Failed` (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Stale after two intervals without a message.
    pub heartbeat_interval_ms: u64,
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, kind: ExchangeKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            symbols: Vec::new(),
            priority: 0,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection attempts exhausted. Only a manual `connect()` leaves it.
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConnectionState {
    pub status: ConnectionStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub subscribed_symbols: Vec<String>,
}

/// Emitted on every status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub exchange: String,
    pub previous: ConnectionStatus,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub at: DateTime<Utc>,
}

/// Delay before reconnection attempt `attempt` (1-based).
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_delay_ms.saturating_mul(u64::from(attempt)))
}

/// WebSocket connection to one exchange.
pub struct ExchangeConnection {
    config: ConnectionConfig,
    normalizer: Normalizer,
    commands: CommandBuilder,
    status: RwLock<ConnectionStatus>,
    reconnect_attempts: AtomicU32,
    subscriptions: SubscriptionRegistry,
    heartbeat: HeartbeatMonitor,
    quote_tx: mpsc::Sender<Quote>,
    status_tx: mpsc::UnboundedSender<StatusChange>,
    /// Live subscribe/unsubscribe commands, consumed by the session loop.
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    shutdown_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExchangeConnection {
    pub fn new(
        config: ConnectionConfig,
        quote_tx: mpsc::Sender<Quote>,
        status_tx: mpsc::UnboundedSender<StatusChange>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            normalizer: Normalizer::new(config.kind, config.name.clone()),
            commands: CommandBuilder::new(config.kind),
            status: RwLock::new(ConnectionStatus::Disconnected),
            reconnect_attempts: AtomicU32::new(0),
            subscriptions: SubscriptionRegistry::with_symbols(&config.symbols),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval_ms),
            quote_tx,
            status_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
            task: Mutex::new(None),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn state(&self) -> ExchangeConnectionState {
        ExchangeConnectionState {
            status: self.status(),
            last_message_at: self.heartbeat.last_message_at(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            subscribed_symbols: self.subscriptions.symbols(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Start the connection task.
    ///
    /// No-op unless the connection is `Disconnected` or `Failed`, and a
    /// permanent no-op after `disconnect()`. Starting from `Failed` resets
    /// the attempt counter.
    pub fn connect(self: &Arc<Self>) {
        if self.is_shutdown() {
            info!(exchange = %self.config.name, "connect() after disconnect() ignored");
            return;
        }

        let previous = {
            let mut status = self.status.write();
            match *status {
                ConnectionStatus::Disconnected | ConnectionStatus::Failed => {}
                other => {
                    debug!(exchange = %self.config.name, status = %other, "connect() ignored, already active");
                    return;
                }
            }
            let previous = *status;
            *status = ConnectionStatus::Connecting;
            previous
        };
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.notify(previous, ConnectionStatus::Connecting);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock() = Some(handle);
    }

    /// Signal shutdown without waiting. Cancels any session, pending
    /// backoff wait and heartbeat check.
    pub fn shutdown(&self) {
        if !self.shutdown_token.is_cancelled() {
            info!(exchange = %self.config.name, "Connection shutdown requested");
            self.shutdown_token.cancel();
        }
    }

    /// Wait for the connection task to finish.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(exchange = %self.config.name, error = %e, "Connection task ended abnormally");
            }
        }
    }

    /// Close the socket and stop for good.
    pub async fn disconnect(&self) {
        self.shutdown();
        self.join().await;
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Record symbols and, if the socket is open, send a subscribe command
    /// for the ones not already subscribed.
    pub fn subscribe(&self, symbols: &[String]) {
        // Status is held across the registry update; see `mark_connected`.
        let status = self.status.read();
        let added = self.subscriptions.add(symbols);
        if added.is_empty() || *status != ConnectionStatus::Connected {
            return;
        }
        drop(status);
        if let Some(command) = self.commands.subscribe(&added) {
            self.queue(command);
        }
    }

    /// Forget symbols and, if the socket is open, send an unsubscribe
    /// command for the ones that were subscribed.
    pub fn unsubscribe(&self, symbols: &[String]) {
        let status = self.status.read();
        let removed = self.subscriptions.remove(symbols);
        if removed.is_empty() || *status != ConnectionStatus::Connected {
            return;
        }
        drop(status);
        if let Some(command) = self.commands.unsubscribe(&removed) {
            self.queue(command);
        }
    }

    pub fn last_quote_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.subscriptions.last_quote_at(symbol)
    }

    fn queue(&self, command: String) {
        if let Err(e) = self.outbound_tx.try_send(command) {
            // The registry still holds the symbols; the next restore covers them.
            warn!(exchange = %self.config.name, error = %e, "Outbound command dropped");
        }
    }

    fn set_status(&self, next: ConnectionStatus) {
        let previous = {
            let mut status = self.status.write();
            if *status == next {
                return;
            }
            std::mem::replace(&mut *status, next)
        };
        self.notify(previous, next);
    }

    /// Switch to `Connected` and snapshot the symbols to restore under the
    /// same status lock. A concurrent `subscribe` lands either in the
    /// snapshot or in its own queued command, never both.
    fn mark_connected(&self) -> Vec<String> {
        let (previous, symbols) = {
            let mut status = self.status.write();
            let symbols = self.subscriptions.symbols();
            (std::mem::replace(&mut *status, ConnectionStatus::Connected), symbols)
        };
        if previous != ConnectionStatus::Connected {
            self.notify(previous, ConnectionStatus::Connected);
        }
        symbols
    }

    fn notify(&self, previous: ConnectionStatus, status: ConnectionStatus) {
        debug!(exchange = %self.config.name, from = %previous, to = %status, "Status changed");
        let change = StatusChange {
            exchange: self.config.name.clone(),
            previous,
            status,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            at: Utc::now(),
        };
        if self.status_tx.send(change).is_err() {
            trace!(exchange = %self.config.name, "Status receiver dropped");
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.is_shutdown() {
                break;
            }
            self.set_status(ConnectionStatus::Connecting);

            match self.session().await {
                Ok(()) => info!(exchange = %self.config.name, "WebSocket session ended"),
                Err(e) => warn!(exchange = %self.config.name, error = %e, "WebSocket session failed"),
            }

            if self.is_shutdown() {
                break;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(exchange = %self.config.name, attempt, "Max reconnection attempts reached");
                self.set_status(ConnectionStatus::Failed);
                return;
            }

            self.set_status(ConnectionStatus::Reconnecting);
            let delay = backoff_delay(self.config.reconnect_base_delay_ms, attempt);
            warn!(
                exchange = %self.config.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => break,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
    }

    /// One socket lifetime. `Ok` only when shutdown was requested.
    async fn session(&self) -> WsResult<()> {
        info!(exchange = %self.config.name, url = %self.config.url, "Connecting to WebSocket");

        let connect = timeout(
            CONNECT_TIMEOUT,
            connect_async_tls_with_config(&self.config.url, None, true, None),
        );
        let (ws_stream, _response) = tokio::select! {
            result = connect => match result {
                Ok(stream) => stream?,
                Err(_) => return Err(WsError::ConnectionFailed("connect timed out".to_string())),
            },
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        // Commands queued while disconnected are superseded by the restore below.
        let mut outbound_rx = self.outbound_rx.lock().await;
        while outbound_rx.try_recv().is_ok() {}

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.heartbeat.reset();
        let symbols = self.mark_connected();
        info!(exchange = %self.config.name, "WebSocket connected");

        if let Some(command) = self.commands.subscribe(&symbols) {
            write.send(Message::Text(command)).await?;
            info!(exchange = %self.config.name, count = symbols.len(), "Subscriptions restored");
        }

        let mut check = tokio::time::interval(self.heartbeat.check_period());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    match timeout(CLOSE_TIMEOUT, write.send(Message::Close(None))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(exchange = %self.config.name, ?e, "Failed to send Close frame"),
                        Err(_) => warn!(exchange = %self.config.name, "Close frame timed out"),
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            trace!(exchange = %self.config.name, "Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(exchange = %self.config.name, code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        // Pong and binary frames carry no ticker data.
                        Some(Ok(_)) => {}
                    }
                }

                Some(command) = outbound_rx.recv() => {
                    debug!(exchange = %self.config.name, %command, "Sending command");
                    write.send(Message::Text(command)).await?;
                }

                _ = check.tick() => {
                    if self.heartbeat.is_stale() {
                        let idle_ms = self.heartbeat.idle().as_millis() as u64;
                        warn!(exchange = %self.config.name, idle_ms, "Feed stale, forcing reconnect");
                        let _ = timeout(CLOSE_TIMEOUT, write.send(Message::Close(None))).await;
                        return Err(WsError::Stale { idle_ms });
                    }
                    if self.heartbeat.should_ping() {
                        if let Some(ping) = self.commands.ping() {
                            write.send(Message::Text(ping)).await?;
                            self.heartbeat.record_ping();
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let received_at = Utc::now();
        let raw: serde_json::Value = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(exchange = %self.config.name, error = %e, "Non-JSON frame dropped");
                return;
            }
        };
        self.heartbeat.record_message();

        let Some(quote) = self.normalizer.normalize(&raw, received_at) else {
            return;
        };
        self.subscriptions.record_quote(&quote.symbol, quote.observed_at);
        if self.quote_tx.send(quote).await.is_err() {
            warn!(exchange = %self.config.name, "Quote receiver dropped");
        }
    }
}
