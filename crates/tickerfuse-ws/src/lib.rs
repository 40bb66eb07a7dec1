//! WebSocket connectivity for the tickerfuse exchange feeds.
//!
//! Provides per-exchange connections with:
//! - Linear reconnection backoff and a terminal `Failed` state
//! - Staleness detection (no message for two heartbeat intervals)
//! - Subscription tracking and batch restore on every reconnection
//! - A supervisor that runs every configured exchange independently

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod supervisor;

pub use connection::{
    backoff_delay, ConnectionConfig, ConnectionStatus, ExchangeConnection,
    ExchangeConnectionState, StatusChange,
};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatMonitor;
pub use message::CommandBuilder;
pub use subscription::SubscriptionRegistry;
pub use supervisor::ConnectionSupervisor;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the process-wide TLS crypto provider.
/// Call before opening any `wss://` connection.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
