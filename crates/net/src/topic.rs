use std::collections::{BTreeMap, VecDeque};
use worldnet_common::{NetworkId, Topic};

use crate::action::Destination;

/// An encoded action waiting to be handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFrame {
    pub topic: Topic,
    pub network: NetworkId,
    pub to: Destination,
    pub payload: Vec<u8>,
}

/// Outgoing channel registrations, one queue per topic.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    outgoing: BTreeMap<Topic, VecDeque<OutgoingFrame>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing channel for `topic` unless one exists.
    /// Returns true when a registration was made.
    pub fn add_outgoing_topic_if_necessary(&mut self, topic: Topic) -> bool {
        if self.outgoing.contains_key(&topic) {
            return false;
        }
        tracing::debug!(%topic, "registered outgoing topic");
        self.outgoing.insert(topic, VecDeque::new());
        true
    }

    pub fn has_outgoing(&self, topic: Topic) -> bool {
        self.outgoing.contains_key(&topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.outgoing.keys().copied()
    }

    /// Queue a frame, registering its topic first if needed.
    pub fn enqueue(&mut self, frame: OutgoingFrame) {
        self.add_outgoing_topic_if_necessary(frame.topic);
        self.outgoing.entry(frame.topic).or_default().push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.outgoing.values().map(VecDeque::len).sum()
    }

    /// Take every queued frame. FIFO within a topic; topics in enum order.
    pub fn drain(&mut self) -> Vec<OutgoingFrame> {
        self.outgoing
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }
}
