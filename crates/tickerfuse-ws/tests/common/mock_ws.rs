//! Mock exchange WebSocket server for integration tests.
//!
//! Accepts connections, records every text frame it receives, and lets the
//! test push frames to (or drop) every connected client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCommand {
    Send(String),
    DropAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Complete the WebSocket handshake and serve.
    Serve,
    /// Accept TCP and hang up before the handshake.
    Refuse,
}

#[derive(Default)]
struct Counters {
    connections: u32,
    closes_received: u32,
    messages: Vec<String>,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<ServerCommand>,
    counters: Arc<Mutex<Counters>>,
}

impl MockWsServer {
    /// Start a serving mock on an available port.
    pub async fn start() -> Self {
        Self::spawn(Mode::Serve).await
    }

    /// Start a mock that accepts TCP connections and immediately drops them.
    pub async fn start_refusing() -> Self {
        Self::spawn(Mode::Refuse).await
    }

    async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Arc::new(Mutex::new(Counters::default()));
        let (commands, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let counters_clone = counters.clone();
        let commands_clone = commands.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        counters_clone.lock().await.connections += 1;
                        if mode == Mode::Refuse {
                            drop(stream);
                            continue;
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            counters_clone.clone(),
                            commands_clone.subscribe(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            counters,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.counters.lock().await.connections
    }

    pub async fn closes_received(&self) -> u32 {
        self.counters.lock().await.closes_received
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.counters.lock().await.messages.clone()
    }

    /// Send a text frame to every connected client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Send(text.into()));
    }

    /// Drop every connected client without a close handshake.
    pub fn drop_clients(&self) {
        let _ = self.commands.send(ServerCommand::DropAll);
    }

    /// Poll until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: u32, within: Duration) -> bool {
        timeout(within, async {
            while self.connection_count().await < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Poll until a received frame contains `needle`; returns it.
    pub async fn wait_for_message(&self, needle: &str, within: Duration) -> Option<String> {
        timeout(within, async {
            loop {
                if let Some(found) = self
                    .received_messages()
                    .await
                    .into_iter()
                    .find(|m| m.contains(needle))
                {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .ok()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    counters: Arc<Mutex<Counters>>,
    mut commands: broadcast::Receiver<ServerCommand>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    counters.lock().await.messages.push(text);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    counters.lock().await.closes_received += 1;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            command = commands.recv() => match command {
                Ok(ServerCommand::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::DropAll) | Err(_) => break,
            },
        }
    }
}
