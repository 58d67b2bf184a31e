//! WebSocket Subscriber Server
//!
//! Realtime subscribers connect here and receive every engine broadcast
//! as a JSON text frame. They may also ask for the current view or ping.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::engine::SharedEngine;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::publisher::BroadcastPublisher;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Accepts subscribers and fans broadcasts out to them.
pub struct SubscriberServer {
    bind_addr: SocketAddr,
    max_subscribers: usize,
    engine: SharedEngine,
    publisher: BroadcastPublisher,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SubscriberServer {
    /// Create a server.
    pub fn new(
        bind_addr: SocketAddr,
        max_subscribers: usize,
        engine: SharedEngine,
        publisher: BroadcastPublisher,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr,
            max_subscribers,
            engine,
            publisher,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Subscriber server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.max_subscribers {
                                warn!("Subscriber limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New subscriber from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Subscriber server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let engine = self.engine.clone();
        let mut updates = self.publisher.subscribe();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => Self::reply_to(client_msg, &engine).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        ServerMessage::Error {
                                            message: "Invalid message format".to_string(),
                                        }
                                    }
                                };
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Subscriber {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    update = updates.recv() => {
                        match update {
                            Ok(msg) => {
                                if msg_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Subscriber {} lagged, {} broadcasts dropped", addr, skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            drop(msg_tx);
            let _ = sender_task.await;
            connections.fetch_sub(1, Ordering::Relaxed);
            debug!("Subscriber {} cleaned up", addr);
        });
    }

    async fn reply_to(msg: ClientMessage, engine: &SharedEngine) -> ServerMessage {
        match msg {
            ClientMessage::SyncRequest => match engine.lock().await.current_view() {
                Some(view) => ServerMessage::MatchUpdate(view),
                None => ServerMessage::Idle,
            },
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
            },
        }
    }

    /// Stop accepting and close every subscriber.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live subscriber connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::game::engine::LiveMatchEngine;
    use crate::network::publisher::Publisher;
    use crate::store::{InMemoryStore, PersistenceWorker};
    use tokio::sync::Mutex;
    use tokio_tungstenite::connect_async;

    fn engine(publisher: &BroadcastPublisher) -> (SharedEngine, PersistenceWorker) {
        let (worker, handle) = PersistenceWorker::new(Arc::new(InMemoryStore::new()));
        let engine = LiveMatchEngine::new(
            EngineConfig::default(),
            handle,
            Arc::new(publisher.clone()),
        );
        (Arc::new(Mutex::new(engine)), worker)
    }

    async fn start() -> (Arc<SubscriberServer>, BroadcastPublisher, SocketAddr, PersistenceWorker) {
        let publisher = BroadcastPublisher::new(16);
        let (engine, worker) = engine(&publisher);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(SubscriberServer::new(addr, 4, engine, publisher.clone()));

        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, publisher, addr, worker)
    }

    async fn next_message<S>(ws: &mut S) -> ServerMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_sync_request_when_idle() {
        let (_server, _publisher, addr, _worker) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"sync_request"}"#.into())).await.unwrap();
        assert!(matches!(next_message(&mut ws).await, ServerMessage::Idle));
    }

    #[tokio::test]
    async fn test_ping_pong_and_bad_message() {
        let (_server, _publisher, addr, _worker) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        ws.send(Message::Text(r#"{"type":"ping","timestamp":7}"#.into())).await.unwrap();
        assert!(matches!(next_message(&mut ws).await, ServerMessage::Pong { timestamp: 7, .. }));

        ws.send(Message::Text("not json".into())).await.unwrap();
        assert!(matches!(next_message(&mut ws).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_forwarded() {
        let (server, publisher, addr, _worker) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        // The reply proves the connection task is subscribed.
        ws.send(Message::Text(r#"{"type":"sync_request"}"#.into())).await.unwrap();
        next_message(&mut ws).await;
        assert_eq!(server.connection_count(), 1);

        publisher.publish(ServerMessage::MatchAbandoned {
            match_id: "m1".into(),
            reason: "manual".into(),
            timestamp: chrono::Utc::now(),
        });

        match next_message(&mut ws).await {
            ServerMessage::MatchAbandoned { match_id, .. } => assert_eq!(match_id, "m1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, _publisher, _addr, _worker) = start().await;
        server.shutdown();
        assert_eq!(server.connection_count(), 0);
    }
}
