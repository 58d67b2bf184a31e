//! Network Layer
//!
//! HTTP ingest, the REST API and the WebSocket subscriber server.
//! Only this layer reads the wall clock; all match logic runs through
//! `game/`.

pub mod http;
pub mod protocol;
pub mod publisher;
pub mod server;

pub use http::{router, AppState};
pub use protocol::{ClientMessage, GsiPayload, MatchUpdate, ServerMessage};
pub use publisher::{BroadcastPublisher, Publisher, RecordingPublisher};
pub use server::{ServerError, SubscriberServer};
