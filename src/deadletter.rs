//! Where undeliverable envelopes go: a tombstoned association, or a
//! terminated one, routes everything it's holding here instead of dropping
//! it silently.

use async_trait::async_trait;

use crate::address::ActorAddress;

/// Receives the payload and recipient of an envelope that could not be
/// delivered.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, underlying: DeadLetterKind, recipient: &ActorAddress);
}

/// What kind of message was dead-lettered, for the sink's own diagnostics.
#[derive(Debug)]
pub enum DeadLetterKind {
    User(Vec<u8>),
    System(crate::envelope::SystemMessage),
}

/// A sink that logs every dead letter through `tracing` and discards it.
pub struct LoggingDeadLetters;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetters {
    async fn dead_letter(&self, underlying: DeadLetterKind, recipient: &ActorAddress) {
        tracing::warn!(%recipient, ?underlying, "dead letter");
    }
}
