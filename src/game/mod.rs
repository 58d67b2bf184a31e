//! Match Engine Module
//!
//! Everything that turns pushed snapshots into match state. Nothing in
//! here touches sockets or storage directly; effects leave through the
//! persistence handle and the publisher.
//!
//! ## Module Structure
//!
//! - `snapshot`: Normalized public/private snapshot types
//! - `normalize`: Raw record decoding and entity resolution
//! - `sequence`: Per-entity and private sequence gates
//! - `buffer`: Pre-match candidate buffer and quorum commit
//! - `round`: Round and phase clock
//! - `combat`: Combat outcome detection
//! - `changes`: Snapshot change detector
//! - `state`: Active match state
//! - `engine`: Lifecycle engine

pub mod snapshot;
pub mod normalize;
pub mod sequence;
pub mod buffer;
pub mod round;
pub mod combat;
pub mod changes;
pub mod state;
pub mod engine;

// Re-export key types
pub use snapshot::{PlayerSnapshot, PrivateSnapshot, RoundContext, RoundPhase};
pub use normalize::SnapshotUpdate;
pub use changes::{diff, ChangeEvent, ChangeKind, ChangeTracker};
pub use combat::{CombatRecord, CombatResult};
pub use state::{LifecycleEvent, LifecyclePhase, MatchState, MatchSummary};
pub use engine::{LiveMatchEngine, ProcessOutcome, SharedEngine};
