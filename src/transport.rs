//! The duplex byte channel abstraction an association writes frames to.
//!
//! The concrete transport (TCP, TLS, an in-memory pipe for tests) is a
//! collaborator outside this crate's scope; this trait is the seam.

use async_trait::async_trait;

use crate::error::Result;

/// A channel capable of writing and flushing a single frame.
///
/// Implementations are expected to serialize concurrent writes internally;
/// an `Association` may call `write_and_flush` from any thread that holds
/// its lock.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn write_and_flush(&self, frame: Vec<u8>) -> Result<()>;

    /// Closes the channel. Called once on association termination.
    async fn close(&self);
}
