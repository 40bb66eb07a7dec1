//! Connection supervisor.
//!
//! Owns one `ExchangeConnection` per configured exchange. Every connection
//! runs on its own task, so a slow or failing exchange never holds up the
//! others.

use crate::connection::{
    ConnectionConfig, ConnectionStatus, ExchangeConnection, ExchangeConnectionState, StatusChange,
};
use crate::error::{WsError, WsResult};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tickerfuse_core::Quote;
use tokio::sync::mpsc;
use tracing::info;

pub struct ConnectionSupervisor {
    connections: Vec<Arc<ExchangeConnection>>,
}

impl ConnectionSupervisor {
    /// Build one connection per config. Every connection forwards quotes to
    /// `quote_tx` and status transitions to `status_tx`.
    pub fn new(
        configs: Vec<ConnectionConfig>,
        quote_tx: mpsc::Sender<Quote>,
        status_tx: mpsc::UnboundedSender<StatusChange>,
    ) -> WsResult<Self> {
        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.name.clone()) {
                return Err(WsError::DuplicateExchange(config.name.clone()));
            }
        }

        let connections = configs
            .into_iter()
            .map(|config| {
                Arc::new(ExchangeConnection::new(
                    config,
                    quote_tx.clone(),
                    status_tx.clone(),
                ))
            })
            .collect();
        Ok(Self { connections })
    }

    /// Start every connection. Returns immediately.
    pub fn connect_all(&self) {
        info!(count = self.connections.len(), "Starting exchange connections");
        for connection in &self.connections {
            connection.connect();
        }
    }

    pub fn subscribe(&self, symbols: &[String]) {
        for connection in &self.connections {
            connection.subscribe(symbols);
        }
    }

    pub fn unsubscribe(&self, symbols: &[String]) {
        for connection in &self.connections {
            connection.unsubscribe(symbols);
        }
    }

    pub fn status_snapshot(&self) -> BTreeMap<String, ConnectionStatus> {
        self.connections
            .iter()
            .map(|c| (c.name().to_string(), c.status()))
            .collect()
    }

    pub fn states(&self) -> BTreeMap<String, ExchangeConnectionState> {
        self.connections
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect()
    }

    pub fn connection(&self, name: &str) -> Option<Arc<ExchangeConnection>> {
        self.connections.iter().find(|c| c.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.name().to_string()).collect()
    }

    /// Manual `connect()` for one exchange, e.g. after it reached `Failed`.
    pub fn retry(&self, name: &str) -> WsResult<()> {
        let connection = self
            .connection(name)
            .ok_or_else(|| WsError::UnknownExchange(name.to_string()))?;
        info!(exchange = %name, status = %connection.status(), "Manual reconnect requested");
        connection.connect();
        Ok(())
    }

    /// Disconnect every connection and wait for all of their tasks.
    pub async fn shutdown_all(&self) {
        for connection in &self.connections {
            connection.shutdown();
        }
        join_all(self.connections.iter().map(|c| c.disconnect())).await;
        info!("All exchange connections stopped");
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
