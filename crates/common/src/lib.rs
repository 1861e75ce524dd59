//! Shared identifiers for the worldnet synchronization core.
//!
//! # Invariants
//! - Identifiers that cross the wire are value types (strings, small integers).
//! - Local entity-table handles never appear here.

pub mod types;

pub use types::{
    EntityUuid, NetworkId, PeerId, PeerIndex, Topic, Transform, UserId, UserIndex,
};
