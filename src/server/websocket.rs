//! WebSocket server implementation
//!
//! Accepts peer connections, assigns each one an id and pumps frames between
//! the socket and the signaling router until either side closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;
use super::router::SignalingRouter;

/// How long shutdown waits for open connections to close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self { bind, port }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// WebSocket server relaying signaling traffic between peers
pub struct WebSocketServer {
    config: ServerConfig,
    router: Arc<SignalingRouter>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, router: SignalingRouter) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            router: Arc::new(router),
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    ///
    /// Each connection runs in its own task. The server stops accepting when
    /// a shutdown signal is received, then waits up to [`SHUTDOWN_GRACE`] for
    /// open connections to send their close frame and leave the registry.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let router = Arc::clone(&self.router);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, router, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if !connections.is_empty() {
            info!("Closing {} active connections...", connections.len());
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}, aborting",
                connections.len(),
                SHUTDOWN_GRACE
            );
            connections.shutdown().await;
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
///
/// The client is registered once the upgrade succeeds and always
/// unregistered on the way out, whatever ended the connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<SignalingRouter>,
    shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    debug!("New connection from {}", peer_addr);

    let ws_stream = accept_async(stream).await?;

    let client_id = Uuid::new_v4();
    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    router.connect(client_id, outbox).await;
    debug!("Client {} connected from {}", client_id, peer_addr);

    let result = pump(ws_stream, client_id, &router, outbox_rx, shutdown_rx).await;

    router.disconnect(client_id).await;
    info!("Connection from {} closed", peer_addr);
    result
}

/// Move frames between the socket and the router until the connection ends
async fn pump(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    client_id: Uuid,
    router: &SignalingRouter,
    mut outbox_rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            // Receive messages from client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        router.handle_text(client_id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", client_id, data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client {} requested close", client_id);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", client_id, e);
                        break;
                    }
                    None => {
                        debug!("Connection closed by {}", client_id);
                        break;
                    }
                }
            }
            // Deliver messages routed to this client
            Some(outgoing) = outbox_rx.recv() => {
                let json = outgoing.to_json()?;
                ws_sender.send(Message::Text(json)).await?;
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received, closing connection to {}", client_id);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}
