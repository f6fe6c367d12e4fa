//! The association state machine: the long-lived per-peer object every
//! outgoing envelope for a remote node passes through.
//!
//! State lives behind a single `tokio::sync::Mutex`, held for the whole
//! duration of `send` and `complete_association`. This is the "simplest
//! correct implementation" the ordering invariant allows: since the lock is
//! held across the channel write, two sends observed in happens-before
//! order acquire the lock in that order and so flush in that order, and a
//! `complete_association` running concurrently with a `send` can't let the
//! new send's bytes race ahead of the queue it's draining.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::deadletter::{DeadLetterKind, DeadLetterSink};
use crate::envelope::TransportEnvelope;
use crate::error::{Error, ErrorKind};
use crate::node::UniqueNode;
use crate::queue::PendingQueue;
use crate::tombstone::Tombstone;
use crate::transport::Channel;
use crate::wire::{encode_frame, Frame, SerializationContext};

enum State {
    Associating(PendingQueue),
    Associated(Arc<dyn Channel>),
    Tombstone,
}

/// The per-peer association. Shared by the owning [`crate::shell::ClusterShell`]
/// and by any number of message producers holding a reference to it.
pub struct Association {
    pub self_node: UniqueNode,
    pub remote_node: UniqueNode,
    state: Mutex<State>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

fn frame_for(envelope: &TransportEnvelope, ctx: &dyn SerializationContext) -> Vec<u8> {
    let frame = match envelope {
        TransportEnvelope::User { payload, recipient, .. } => Frame::UserEnvelope {
            recipient: recipient.clone(),
            payload: payload.clone(),
        },
        TransportEnvelope::System { message, .. } => Frame::SystemEnvelope { message: message.clone() },
    };
    encode_frame(&frame, ctx)
}

fn dead_letter_kind(envelope: &TransportEnvelope) -> DeadLetterKind {
    match envelope {
        TransportEnvelope::User { payload, .. } => DeadLetterKind::User(payload.clone()),
        TransportEnvelope::System { message, .. } => DeadLetterKind::System(message.clone()),
    }
}

impl Association {
    /// Creates a fresh association in the `associating` state, as done by
    /// the cluster shell on first send or inbound offer.
    pub fn new_associating(
        self_node: UniqueNode,
        remote_node: UniqueNode,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Association {
            self_node,
            remote_node,
            state: Mutex::new(State::Associating(PendingQueue::new())),
            dead_letters,
        }
    }

    /// Creates an association that is already tombstoned - used when a
    /// lookup finds the remote node barred by an existing tombstone.
    pub fn new_tombstoned(self_node: UniqueNode, remote_node: UniqueNode, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Association {
            self_node,
            remote_node,
            state: Mutex::new(State::Tombstone),
            dead_letters,
        }
    }

    /// Routes `envelope` according to the current state: buffers it while
    /// associating, writes it while associated, or dead-letters it once
    /// tombstoned.
    pub async fn send(&self, envelope: TransportEnvelope, ctx: &dyn SerializationContext) {
        let mut state = self.state.lock().await;
        match &mut *state {
            State::Associating(queue) => {
                trace!(remote = %self.remote_node, "buffering envelope, association not yet established");
                queue.push(envelope);
            }
            State::Associated(channel) => {
                let channel = Arc::clone(channel);
                let frame = frame_for(&envelope, ctx);
                let result = channel.write_and_flush(frame).await;
                if let Err(e) = &result {
                    warn!(remote = %self.remote_node, error = %e, "channel write failed");
                }
                complete_promise(envelope, result);
            }
            State::Tombstone => {
                self.dead_letter(envelope).await;
            }
        }
    }

    async fn dead_letter(&self, envelope: TransportEnvelope) {
        let recipient = envelope.recipient().clone();
        let kind = dead_letter_kind(&envelope);
        self.dead_letters.dead_letter(kind, &recipient).await;
        envelope.fail(Error::simple(ErrorKind::AssociationTerminated));
    }

    /// Legal only from `associating`. Atomically installs `channel` as the
    /// transport and flushes every buffered envelope to it in enqueue
    /// order. Calling this from `tombstone` closes `channel` and returns;
    /// calling it twice from `associated` is a programmer error.
    pub async fn complete_association(&self, channel: Arc<dyn Channel>, ctx: &dyn SerializationContext) {
        let mut state = self.state.lock().await;
        match &mut *state {
            State::Tombstone => {
                channel.close().await;
            }
            State::Associated(_) => {
                panic!("complete_association called twice on {}", self.remote_node);
            }
            State::Associating(queue) => {
                debug!(remote = %self.remote_node, pending = queue.len(), "association established, flushing queue");
                for envelope in queue.drain() {
                    let frame = frame_for(&envelope, ctx);
                    let result = channel.write_and_flush(frame).await;
                    if let Err(e) = &result {
                        warn!(remote = %self.remote_node, error = %e, "channel write failed while flushing");
                    }
                    complete_promise(envelope, result);
                }
                *state = State::Associated(channel);
            }
        }
    }

    /// Terminates the association: drains any queued envelopes or closes
    /// the channel (whichever is present), installs the `tombstone` state,
    /// and returns a [`Tombstone`] with a deadline `ttl` from now.
    pub async fn terminate(&self, ttl: std::time::Duration) -> Tombstone {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, State::Tombstone) {
            State::Associating(mut queue) => {
                debug!(remote = %self.remote_node, pending = queue.len(), "terminating associating association");
                for envelope in queue.drain() {
                    self.dead_letter_owned(envelope).await;
                }
            }
            State::Associated(channel) => {
                debug!(remote = %self.remote_node, "terminating associated association");
                channel.close().await;
            }
            State::Tombstone => {
                // idempotent
            }
        }
        Tombstone::new(self.remote_node.clone(), Instant::now() + ttl)
    }

    async fn dead_letter_owned(&self, envelope: TransportEnvelope) {
        let recipient = envelope.recipient().clone();
        let kind = dead_letter_kind(&envelope);
        self.dead_letters.dead_letter(kind, &recipient).await;
        envelope.fail(Error::simple(ErrorKind::AssociationTerminated));
    }
}

fn complete_promise(envelope: TransportEnvelope, result: crate::error::Result<()>) {
    if let TransportEnvelope::User { promise: Some(promise), .. } = envelope {
        let _ = promise.send(result);
    }
}
