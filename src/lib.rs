//! Association subsystem for the remote transport of a distributed actor
//! runtime: node identity, the handshake protocol, the association state
//! machine, and the cluster shell that owns both.

pub mod address;
pub mod association;
pub mod config;
pub mod deadletter;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod node;
pub mod queue;
pub mod shell;
pub mod tombstone;
pub mod transport;
pub mod wire;
