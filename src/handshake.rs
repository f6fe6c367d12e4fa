//! The handshake protocol that produces an association: Offer, then
//! Accept or Reject.
//!
//! Arbitration between concurrent offers (duplicate/tombstoned/tie-break
//! checks) is the [`crate::shell::ClusterShell`]'s job, since it's the only
//! component that can see the whole association map; this module tracks
//! the state of one attempt and the frames it exchanges.

use std::sync::Arc;

use crate::node::UniqueNode;
use crate::transport::Channel;
use crate::wire::RejectReason;

/// One side's view of an in-flight or concluded handshake attempt.
pub enum HandshakeState {
    Initiated { local_offer: UniqueNode },
    Completed { local_node: UniqueNode, remote_node: UniqueNode, channel: Arc<dyn Channel> },
    Rejected { reason: RejectReason },
}

/// Tracks a single handshake attempt between `local` and `remote`.
pub struct Handshake {
    pub local: UniqueNode,
    pub remote: UniqueNode,
    state: HandshakeState,
}

impl Handshake {
    /// Starts a handshake as the initiating side: an Offer is about to be
    /// sent to `remote`.
    pub fn initiate(local: UniqueNode, remote: UniqueNode) -> Self {
        let state = HandshakeState::Initiated { local_offer: local.clone() };
        Handshake { local, remote, state }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Transitions to `completed` on receipt of an Accept (or on locally
    /// deciding to accept an inbound Offer).
    pub fn complete(&mut self, channel: Arc<dyn Channel>) {
        self.state = HandshakeState::Completed {
            local_node: self.local.clone(),
            remote_node: self.remote.clone(),
            channel,
        };
    }

    /// Transitions to `rejected` with the given reason.
    pub fn reject(&mut self, reason: RejectReason) {
        self.state = HandshakeState::Rejected { reason };
    }

    pub fn is_concluded(&self) -> bool {
        !matches!(self.state, HandshakeState::Initiated { .. })
    }
}
