//! A FIFO of envelopes buffered while an association has no channel yet.

use std::collections::VecDeque;

use crate::envelope::TransportEnvelope;

/// Owned by an [`crate::association::Association`] only while it is in the
/// `associating` state. Preserves strict enqueue order across the flush to
/// a channel on `completeAssociation`, and across the dead-letter drain on
/// `terminate`.
#[derive(Default)]
pub struct PendingQueue {
    envelopes: VecDeque<TransportEnvelope>,
}

impl PendingQueue {
    pub fn new() -> Self {
        PendingQueue { envelopes: VecDeque::new() }
    }

    pub fn push(&mut self, envelope: TransportEnvelope) {
        self.envelopes.push_back(envelope);
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Drains every envelope in enqueue order, leaving the queue empty.
    pub fn drain(&mut self) -> impl Iterator<Item = TransportEnvelope> + '_ {
        self.envelopes.drain(..)
    }
}
