//! World Kernel: the local entity store the synchronization core mutates.
//!
//! # Invariants
//! - A UUID maps to at most one live entity and vice versa.
//! - Entity handles are process-local and never reused.
//! - All state mutations flow through explicit operations and are logged.

pub mod world;

pub use world::{EntityData, EntityHandle, World, WorldError, WorldEvent};
