//! Transport seam: the core hands encoded actions to a [`Transport`] and is
//! fed connection lifecycle as [`TransportEvent`]s.
//!
//! [`MemoryHub`] is an in-process transport used by tests and the CLI
//! simulations. It is single-threaded, like the tick loop that drives it.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use worldnet_common::{NetworkId, PeerId, Topic, UserId};

use crate::action::Destination;

/// Errors surfaced by a transport when sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error("transport for {0} is disconnected")]
    Disconnected(PeerId),
}

/// Connection lifecycle reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected {
        network: NetworkId,
        peer_id: PeerId,
        user_id: UserId,
    },
    Reconnected {
        network: NetworkId,
    },
    Disconnected {
        network: NetworkId,
        peer_id: PeerId,
    },
}

/// Outbound half of a network connection.
pub trait Transport {
    fn send(&mut self, topic: Topic, to: &Destination, payload: &[u8]) -> Result<(), TransportError>;
}

#[derive(Debug, Default)]
struct HubState {
    inboxes: BTreeMap<PeerId, VecDeque<(Topic, Vec<u8>)>>,
    delivered: u64,
}

/// Shared in-memory switchboard. Each connected peer has an inbox.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a peer and return its transport endpoint.
    pub fn connect(&self, peer_id: PeerId) -> MemoryTransport {
        self.state
            .borrow_mut()
            .inboxes
            .entry(peer_id.clone())
            .or_default();
        MemoryTransport {
            hub: self.clone(),
            peer_id,
        }
    }

    /// Drop a peer's inbox. Frames in flight to it are lost.
    pub fn disconnect(&self, peer_id: &PeerId) {
        self.state.borrow_mut().inboxes.remove(peer_id);
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.state.borrow().inboxes.contains_key(peer_id)
    }

    /// Total frames delivered into inboxes so far.
    pub fn delivered(&self) -> u64 {
        self.state.borrow().delivered
    }
}

/// One peer's endpoint on a [`MemoryHub`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    peer_id: PeerId,
}

impl MemoryTransport {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Take every frame delivered to this peer, in arrival order.
    pub fn recv(&mut self) -> Vec<(Topic, Vec<u8>)> {
        self.hub
            .state
            .borrow_mut()
            .inboxes
            .get_mut(&self.peer_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, topic: Topic, to: &Destination, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.hub.state.borrow_mut();
        if !state.inboxes.contains_key(&self.peer_id) {
            return Err(TransportError::Disconnected(self.peer_id.clone()));
        }
        match to {
            Destination::All => {
                let mut delivered = 0;
                for (peer, inbox) in state.inboxes.iter_mut() {
                    if *peer != self.peer_id {
                        inbox.push_back((topic, payload.to_vec()));
                        delivered += 1;
                    }
                }
                state.delivered += delivered;
            }
            Destination::Peer(peer) => {
                let inbox = state
                    .inboxes
                    .get_mut(peer)
                    .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
                inbox.push_back((topic, payload.to_vec()));
                state.delivered += 1;
            }
        }
        Ok(())
    }
}
