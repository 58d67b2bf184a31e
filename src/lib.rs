//! # Underlords GSI Server
//!
//! Live match engine for Dota Underlords game-state integration
//! telemetry: the game client pushes snapshots, the engine infers the
//! match, its rounds, combats and per-player changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  UNDERLORDS GSI SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Identity primitives                       │
//! │  ├── entity.rs   - Entity ids, bot id derivation             │
//! │  └── hash.rs     - Match id and persona hashing              │
//! │                                                              │
//! │  game/           - Match engine (no I/O)                     │
//! │  ├── normalize.rs- Raw record decoding                       │
//! │  ├── sequence.rs - Duplicate and replay gates                │
//! │  ├── buffer.rs   - Pre-match quorum                          │
//! │  ├── round.rs    - Round and phase clock                     │
//! │  ├── combat.rs   - Combat outcomes                           │
//! │  ├── changes.rs  - Snapshot change detector                  │
//! │  ├── state.rs    - Active match state                        │
//! │  └── engine.rs   - Lifecycle engine                          │
//! │                                                              │
//! │  store/          - Persistence                               │
//! │  ├── worker.rs   - Single-consumer write queue               │
//! │  ├── memory.rs   - In-memory store                           │
//! │  └── history.rs  - Offline change recomputation              │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── http.rs     - Ingest and REST API                       │
//! │  ├── server.rs   - WebSocket subscribers                     │
//! │  ├── publisher.rs- Broadcast fan-out                         │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! The game client's capture times are never used for ordering. Each
//! entity's updates are ordered by its own sequence number, so replays
//! and out-of-order delivery converge on the same state, and the match
//! id depends only on the confirmed roster.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::{EngineConfig, ServerConfig};
pub use core::entity::EntityId;
pub use core::hash::compute_match_id;
pub use game::engine::{LiveMatchEngine, SharedEngine};
pub use game::state::MatchState;
pub use store::{InMemoryStore, MatchStore, PersistenceWorker};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
