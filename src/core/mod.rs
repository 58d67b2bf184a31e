//! Core identity primitives.
//!
//! Everything here is pure and deterministic: the same inputs give the
//! same ids on every process, which is what makes match creation
//! idempotent.

pub mod entity;
pub mod hash;

// Re-export core types
pub use entity::EntityId;
pub use hash::compute_match_id;
