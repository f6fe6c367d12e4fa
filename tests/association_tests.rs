use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use remote_assoc::address::ActorAddress;
use remote_assoc::association::Association;
use remote_assoc::config::ClusterSettings;
use remote_assoc::deadletter::{DeadLetterKind, DeadLetterSink};
use remote_assoc::node::{Node, NodeId, UniqueNode};
use remote_assoc::shell::{ClusterShell, HandshakeInitiator, OfferOutcome};
use remote_assoc::transport::Channel;
use remote_assoc::wire::{RejectReason, SerializationContext};

struct NullChannel;

#[async_trait]
impl Channel for NullChannel {
    async fn write_and_flush(&self, _frame: Vec<u8>) -> remote_assoc::error::Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

struct NoopInitiator;

#[async_trait]
impl HandshakeInitiator for NoopInitiator {
    async fn initiate_handshake(&self, _local: UniqueNode, _target: UniqueNode) {}
}

struct RecordingDeadLetters {
    received: Mutex<Vec<ActorAddress>>,
}

impl RecordingDeadLetters {
    fn new() -> Self {
        RecordingDeadLetters { received: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn dead_letter(&self, _underlying: DeadLetterKind, recipient: &ActorAddress) {
        self.received.lock().unwrap().push(recipient.clone());
    }
}

struct FixedCtx(UniqueNode);

impl SerializationContext for FixedCtx {
    fn local_node(&self) -> &UniqueNode {
        &self.0
    }
}

fn unique(host: &str, port: u16, nid: u32) -> UniqueNode {
    UniqueNode::new(Node::new("sact-test", host, port), NodeId::from(nid))
}

fn shell_for(self_node: UniqueNode) -> ClusterShell {
    ClusterShell::new(
        self_node,
        ClusterSettings::default(),
        Arc::new(RecordingDeadLetters::new()),
        Arc::new(NoopInitiator),
    )
}

// Scenario 2: concurrent handshake tie-break. Node A and Node B offer to
// each other at the same time; exactly one side's inbound offer is
// accepted, and the loser is the one with the lexicographically larger
// UniqueNode.
#[tokio::test]
async fn concurrent_handshake_tie_break_is_symmetric() {
    let a = unique("host", 1, 0x1111);
    let b = unique("host", 1, 0x2222);

    let shell_a = shell_for(a.clone());
    let shell_b = shell_for(b.clone());

    // both sides have already recorded an outbound attempt toward the
    // other, simulating the race.
    let _ = shell_a.association_for(b.clone());
    let _ = shell_b.association_for(a.clone());

    let ctx_a = FixedCtx(a.clone());
    let ctx_b = FixedCtx(b.clone());

    // B's offer arrives at A.
    let outcome_on_a = shell_a
        .on_inbound_offer(b.clone(), a.clone(), Arc::new(NullChannel), &ctx_a)
        .await;
    // A's offer arrives at B.
    let outcome_on_b = shell_b
        .on_inbound_offer(a.clone(), b.clone(), Arc::new(NullChannel), &ctx_b)
        .await;

    // A has the smaller UniqueNode and wins: A rejects B's inbound offer,
    // B accepts A's.
    assert!(matches!(outcome_on_a, OfferOutcome::Reject(RejectReason::ConcurrentLost)));
    assert!(matches!(outcome_on_b, OfferOutcome::Accept));
}

// Scenario 3: incarnation swap. A new Offer from the same host:port but a
// different NodeID tombstones the stale association and installs a fresh
// one.
#[tokio::test]
async fn incarnation_swap_tombstones_the_old_association() {
    let local = unique("self", 9000, 1);
    let old_remote = unique("1.1.1.1", 7337, 0xAAAA);
    let new_remote = unique("1.1.1.1", 7337, 0xBBBB);

    let shell = shell_for(local.clone());
    let ctx = FixedCtx(local.clone());

    let outcome = shell
        .on_inbound_offer(old_remote.clone(), local.clone(), Arc::new(NullChannel), &ctx)
        .await;
    assert!(matches!(outcome, OfferOutcome::Accept));
    assert_eq!(shell.association_count(), 1);

    let outcome = shell
        .on_inbound_offer(new_remote.clone(), local.clone(), Arc::new(NullChannel), &ctx)
        .await;
    assert!(matches!(outcome, OfferOutcome::Accept));

    assert_eq!(shell.association_count(), 1);
    assert_eq!(shell.tombstone_count(), 1);
}

// Scenario 4 (end to end through the public API): a send on a tombstoned
// association is dead-lettered and its promise fails.
#[tokio::test]
async fn send_after_termination_dead_letters() {
    let local = unique("self", 9000, 1);
    let remote = unique("peer", 7337, 2);
    let sink = Arc::new(RecordingDeadLetters::new());
    let assoc = Association::new_associating(local.clone(), remote.clone(), sink.clone());

    let terminated = assoc.terminate(ClusterSettings::default().association_tombstone_ttl).await;
    assert_eq!(terminated.remote_node, remote);

    let ctx = FixedCtx(local);
    let recipient = ActorAddress::new(Some(remote), vec!["user".into(), "x".into()], 0);
    let (tx, rx) = oneshot::channel();
    assoc
        .send(
            remote_assoc::envelope::TransportEnvelope::user(b"hi".to_vec(), recipient.clone(), Some(tx)),
            &ctx,
        )
        .await;

    assert!(rx.recv().unwrap().is_err());
    assert_eq!(sink.received.lock().unwrap().as_slice(), &[recipient]);
}
