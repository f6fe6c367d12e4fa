//! The cluster shell: single owner of the association map and the
//! tombstone set, and the arbiter of concurrent handshakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::association::Association;
use crate::config::ClusterSettings;
use crate::deadletter::DeadLetterSink;
use crate::handshake::Handshake;
use crate::node::UniqueNode;
use crate::tombstone::Tombstone;
use crate::transport::Channel;
use crate::wire::{RejectReason, SerializationContext};

/// Dials a peer and drives the outbound side of a handshake to completion.
///
/// This is the transport collaborator: opening the connection, writing the
/// Offer frame, and reading back Accept/Reject are outside this crate's
/// scope. An implementation is expected to eventually call
/// [`ClusterShell::on_handshake_completed`] or
/// [`ClusterShell::on_handshake_rejected`] with the outcome.
#[async_trait]
pub trait HandshakeInitiator: Send + Sync {
    async fn initiate_handshake(&self, local: UniqueNode, target: UniqueNode);
}

/// The outcome of arbitrating an inbound Offer, as decided by
/// [`ClusterShell::on_inbound_offer`]. The caller (the transport's accept
/// loop) is responsible for writing the corresponding Accept/Reject frame.
pub enum OfferOutcome {
    Accept,
    Reject(RejectReason),
}

struct ShellState {
    associations: HashMap<UniqueNode, Arc<Association>>,
    tombstones: HashMap<UniqueNode, Tombstone>,
    handshakes: HashMap<UniqueNode, Handshake>,
}

/// Owns every association this node has with its peers.
pub struct ClusterShell {
    self_node: UniqueNode,
    settings: ClusterSettings,
    dead_letters: Arc<dyn DeadLetterSink>,
    initiator: Arc<dyn HandshakeInitiator>,
    state: Mutex<ShellState>,
}

impl ClusterShell {
    pub fn new(
        self_node: UniqueNode,
        settings: ClusterSettings,
        dead_letters: Arc<dyn DeadLetterSink>,
        initiator: Arc<dyn HandshakeInitiator>,
    ) -> Self {
        ClusterShell {
            self_node,
            settings,
            dead_letters,
            initiator,
            state: Mutex::new(ShellState {
                associations: HashMap::new(),
                tombstones: HashMap::new(),
                handshakes: HashMap::new(),
            }),
        }
    }

    pub fn self_node(&self) -> &UniqueNode {
        &self.self_node
    }

    /// Returns the association for `remote`, creating it (and kicking off
    /// a handshake) if this is the first time it's been looked up, or
    /// returning an already-tombstoned association if `remote` is barred.
    pub fn association_for(&self, remote: UniqueNode) -> Arc<Association> {
        let mut guard = self.state.lock();

        if guard.tombstones.contains_key(&remote) {
            return Arc::new(Association::new_tombstoned(
                self.self_node.clone(),
                remote,
                Arc::clone(&self.dead_letters),
            ));
        }

        if let Some(assoc) = guard.associations.get(&remote) {
            return Arc::clone(assoc);
        }

        let assoc = Arc::new(Association::new_associating(
            self.self_node.clone(),
            remote.clone(),
            Arc::clone(&self.dead_letters),
        ));
        guard.associations.insert(remote.clone(), Arc::clone(&assoc));
        guard
            .handshakes
            .insert(remote.clone(), Handshake::initiate(self.self_node.clone(), remote.clone()));
        drop(guard);

        let initiator = Arc::clone(&self.initiator);
        let local = self.self_node.clone();
        tokio::spawn(async move {
            initiator.initiate_handshake(local, remote).await;
        });

        assoc
    }

    /// Arbitrates an inbound Offer from `sender` addressed to `target`,
    /// per the rules in the handshake protocol: wrong-target, tombstoned,
    /// duplicate, concurrent-lost, and stale-incarnation all reject; a
    /// clean new attempt (or the winning side of a tie-break) accepts and
    /// installs `channel`.
    pub async fn on_inbound_offer(
        &self,
        sender: UniqueNode,
        target: UniqueNode,
        channel: Arc<dyn Channel>,
        ctx: &dyn SerializationContext,
    ) -> OfferOutcome {
        if target != self.self_node {
            warn!(%sender, %target, "offer targeted at a different node, rejecting");
            return OfferOutcome::Reject(RejectReason::WrongTarget);
        }

        enum Action {
            Reject(RejectReason),
            Accept { assoc: Arc<Association>, stale: Option<Arc<Association>> },
        }

        let action = {
            let mut guard = self.state.lock();

            if guard.tombstones.contains_key(&sender) {
                Action::Reject(RejectReason::Tombstoned)
            } else if guard.handshakes.contains_key(&sender) {
                if self.self_node.wins_tie_break_against(&sender) {
                    debug!(%sender, "concurrent handshake, we win the tie-break");
                    Action::Reject(RejectReason::ConcurrentLost)
                } else {
                    debug!(%sender, "concurrent handshake, we lose the tie-break, accepting inbound");
                    guard.handshakes.remove(&sender);
                    let stale = guard.associations.remove(&sender);
                    let assoc = Arc::new(Association::new_associating(
                        self.self_node.clone(),
                        sender.clone(),
                        Arc::clone(&self.dead_letters),
                    ));
                    guard.associations.insert(sender.clone(), Arc::clone(&assoc));
                    Action::Accept { assoc, stale }
                }
            } else if let Some(stale_key) = guard
                .associations
                .keys()
                .find(|k| k.node == sender.node && **k != sender)
                .cloned()
            {
                debug!(old = %stale_key, new = %sender, "incarnation swap, tombstoning stale association");
                let stale = guard.associations.remove(&stale_key);
                let assoc = Arc::new(Association::new_associating(
                    self.self_node.clone(),
                    sender.clone(),
                    Arc::clone(&self.dead_letters),
                ));
                guard.associations.insert(sender.clone(), Arc::clone(&assoc));
                Action::Accept { assoc, stale }
            } else if guard.associations.contains_key(&sender) {
                Action::Reject(RejectReason::Duplicate)
            } else {
                let assoc = Arc::new(Association::new_associating(
                    self.self_node.clone(),
                    sender.clone(),
                    Arc::clone(&self.dead_letters),
                ));
                guard.associations.insert(sender.clone(), Arc::clone(&assoc));
                Action::Accept { assoc, stale: None }
            }
        };

        match action {
            Action::Reject(reason) => OfferOutcome::Reject(reason),
            Action::Accept { assoc, stale } => {
                if let Some(stale) = stale {
                    let tombstone = stale.terminate(self.settings.association_tombstone_ttl).await;
                    self.state.lock().tombstones.insert(tombstone.remote_node.clone(), tombstone);
                }
                assoc.complete_association(channel, ctx).await;
                OfferOutcome::Accept
            }
        }
    }

    /// Called by the initiating side once its Offer has been Accepted.
    pub async fn on_handshake_completed(&self, remote: UniqueNode, channel: Arc<dyn Channel>, ctx: &dyn SerializationContext) {
        let assoc = {
            let mut guard = self.state.lock();
            guard.handshakes.remove(&remote);
            guard.associations.get(&remote).cloned()
        };
        match assoc {
            Some(assoc) => assoc.complete_association(channel, ctx).await,
            None => channel.close().await,
        }
    }

    /// Called by the initiating side when its Offer is Rejected (or times out).
    pub async fn on_handshake_rejected(&self, remote: UniqueNode, reason: RejectReason) {
        warn!(%remote, ?reason, "handshake rejected");
        let assoc = {
            let mut guard = self.state.lock();
            guard.handshakes.remove(&remote);
            guard.associations.remove(&remote)
        };
        if let Some(assoc) = assoc {
            let tombstone = assoc.terminate(self.settings.association_tombstone_ttl).await;
            self.state.lock().tombstones.insert(tombstone.remote_node.clone(), tombstone);
        }
    }

    /// Removes tombstones whose deadline has passed as of `now`.
    pub fn reap_tombstones(&self, now: Instant) {
        let mut guard = self.state.lock();
        let before = guard.tombstones.len();
        guard.tombstones.retain(|_, t| !t.has_expired(now));
        let reaped = before - guard.tombstones.len();
        if reaped > 0 {
            debug!(reaped, "reaped expired tombstones");
        }
    }

    /// Terminates every association, tombstoning each. Called on cluster
    /// shutdown so in-flight sends dead-letter rather than hang.
    pub async fn shutdown(&self) {
        let associations: Vec<Arc<Association>> = {
            let guard = self.state.lock();
            guard.associations.values().cloned().collect()
        };
        for assoc in associations {
            let remote = assoc.remote_node.clone();
            let tombstone = assoc.terminate(self.settings.association_tombstone_ttl).await;
            self.state.lock().tombstones.insert(remote, tombstone);
        }
    }

    /// Number of live associations currently tracked. Mostly useful for
    /// diagnostics and tests.
    pub fn association_count(&self) -> usize {
        self.state.lock().associations.len()
    }

    /// Number of tombstones currently tracked.
    pub fn tombstone_count(&self) -> usize {
        self.state.lock().tombstones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeId};
    use std::time::Duration;

    struct NoopInitiator;
    #[async_trait]
    impl HandshakeInitiator for NoopInitiator {
        async fn initiate_handshake(&self, _local: UniqueNode, _target: UniqueNode) {}
    }

    struct NoopDeadLetters;
    #[async_trait]
    impl DeadLetterSink for NoopDeadLetters {
        async fn dead_letter(&self, _underlying: crate::deadletter::DeadLetterKind, _recipient: &crate::address::ActorAddress) {}
    }

    struct FixedCtx(UniqueNode);
    impl SerializationContext for FixedCtx {
        fn local_node(&self) -> &UniqueNode {
            &self.0
        }
    }

    fn node(nid: u32) -> UniqueNode {
        UniqueNode::new(Node::new("sys", "host", 7337), NodeId::from(nid))
    }

    struct NullChannel;
    #[async_trait]
    impl Channel for NullChannel {
        async fn write_and_flush(&self, _frame: Vec<u8>) -> crate::error::Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn tombstone_expiry_allows_new_handshake() {
        let remote = node(0x2222);
        let ctx = FixedCtx(node(0x1111));

        let mut settings = ClusterSettings::default();
        settings.association_tombstone_ttl = Duration::from_millis(10);
        let shell = ClusterShell::new(node(0x1111), settings, Arc::new(NoopDeadLetters), Arc::new(NoopInitiator));

        let channel: Arc<dyn Channel> = Arc::new(NullChannel);
        let outcome = shell.on_inbound_offer(remote.clone(), node(0x1111), channel, &ctx).await;
        assert!(matches!(outcome, OfferOutcome::Accept));
        assert_eq!(shell.association_count(), 1);

        shell.on_handshake_rejected(remote.clone(), RejectReason::Other).await;
        assert_eq!(shell.tombstone_count(), 1);
        assert_eq!(shell.association_count(), 0);

        tokio::time::sleep(Duration::from_millis(15)).await;
        shell.reap_tombstones(Instant::now());
        assert_eq!(shell.tombstone_count(), 0);

        let channel: Arc<dyn Channel> = Arc::new(NullChannel);
        let outcome = shell.on_inbound_offer(remote.clone(), node(0x1111), channel, &ctx).await;
        assert!(matches!(outcome, OfferOutcome::Accept));
    }
}
