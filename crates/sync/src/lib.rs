//! World entity synchronization: the session context that owns every
//! registry, and the spawn/destroy/authority protocol built on the action bus.
//!
//! # Invariants
//! - Spawn and destroy handlers are idempotent under redelivery.
//! - No entity action is applied or emitted before the world network is ready.
//! - Scene-sourced entities are owned by the scene user and converge without a host.
//! - Only UUIDs cross the wire; the UUID→entity index is local.

mod config;
mod error;
mod scene;
mod session;
mod waitlist;

pub use config::{ConfigError, SyncConfig};
pub use error::SyncError;
pub use scene::{SceneEntity, SceneTracker};
pub use session::Session;
pub use waitlist::ParentWaitlist;

pub fn crate_info() -> &'static str {
    concat!("worldnet-sync v", env!("CARGO_PKG_VERSION"))
}
