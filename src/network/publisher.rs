//! Realtime Publisher
//!
//! Fire-and-forget fan-out of [`ServerMessage`]s. The engine hands a
//! message over and moves on; nobody acknowledges anything.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::network::protocol::ServerMessage;

/// Default broadcast channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Sink for engine broadcasts.
pub trait Publisher: Send + Sync {
    /// Hand a message over. Must not block.
    fn publish(&self, message: ServerMessage);
}

/// Publisher backed by a tokio broadcast channel.
///
/// Every WebSocket connection holds its own receiver. Slow receivers
/// lag and lose the oldest messages rather than slowing the engine.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ServerMessage>,
}

impl BroadcastPublisher {
    /// Create a publisher with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for a subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            debug!("No subscribers, dropping broadcast");
        }
    }
}

/// Publisher that keeps every message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    messages: Arc<Mutex<Vec<ServerMessage>>>,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far.
    pub fn take(&self) -> Vec<ServerMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: ServerMessage) {
        self.messages.lock().push(message);
    }
}
