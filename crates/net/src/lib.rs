//! Networking core: topic and network registries, per-network peer registry,
//! the action bus and its wire codec.
//!
//! # Invariants
//! - Every network belongs to exactly one topic; at most one network per id.
//! - Actions on the same network are applied in dispatch order.
//! - An action whose network is gone is dropped, never fatal.
//! - Registries are single-writer: only the tick loop mutates them.

pub mod action;
mod bus;
pub mod codec;
mod network;
mod peer;
mod receptor;
mod topic;
pub mod transport;

pub use action::{ActionEnvelope, ActionError, ActionId, Destination, NetworkTarget, WorldAction};
pub use bus::{ActionBus, BusStats};
pub use codec::CodecError;
pub use network::{Network, NetworkError, NetworkRegistry};
pub use peer::{NetworkPeer, PeerError};
pub use receptor::{PeerChange, apply_peer_action};
pub use topic::{OutgoingFrame, TopicRegistry};
pub use transport::{MemoryHub, MemoryTransport, Transport, TransportError, TransportEvent};

pub fn crate_info() -> &'static str {
    concat!("worldnet-net v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().starts_with("worldnet-net"));
    }
}
