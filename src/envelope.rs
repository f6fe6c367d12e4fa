//! Transport envelopes: the unit that crosses the wire, and the only thing
//! an [`crate::association::Association`] knows how to route.

use crate::address::ActorAddress;
use crate::error::Error;

/// Completion notifier handed back to a caller of `send`. Resolves when the
/// envelope's bytes are flushed to the channel, or fails if the envelope is
/// dead-lettered instead.
pub type Promise = oneshot::Sender<Result<(), Error>>;

/// System-level control messages, distinct from user payloads.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SystemMessage {
    Watch { watchee: ActorAddress, watcher: ActorAddress },
    Terminated { actor_ref: ActorAddress, existence_confirmed: bool, address_terminated: bool },
}

/// The envelope that flows through an association: either a user message
/// bound for some actor, or a system message.
pub enum TransportEnvelope {
    User {
        payload: Vec<u8>,
        recipient: ActorAddress,
        promise: Option<Promise>,
    },
    System {
        message: SystemMessage,
        recipient: ActorAddress,
    },
}

impl TransportEnvelope {
    pub fn user(payload: Vec<u8>, recipient: ActorAddress, promise: Option<Promise>) -> Self {
        TransportEnvelope::User { payload, recipient, promise }
    }

    pub fn system(message: SystemMessage, recipient: ActorAddress) -> Self {
        TransportEnvelope::System { message, recipient }
    }

    pub fn recipient(&self) -> &ActorAddress {
        match self {
            TransportEnvelope::User { recipient, .. } => recipient,
            TransportEnvelope::System { recipient, .. } => recipient,
        }
    }

    /// Fails the envelope's promise, if any, with `err`. No-op for system
    /// envelopes and for user envelopes that were sent without a promise.
    pub fn fail(self, err: Error) {
        if let TransportEnvelope::User { promise: Some(p), .. } = self {
            let _ = p.send(Err(err));
        }
    }
}
