//! Settings governing association lifecycle and handshake timing.

use std::time::Duration;

/// Configuration for a [`crate::shell::ClusterShell`].
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    /// How long a tombstone survives before [`crate::shell::ClusterShell::reap_tombstones`]
    /// removes it and the peer becomes reachable again.
    pub association_tombstone_ttl: Duration,
    /// How long a handshake attempt waits for an Accept/Reject before it's
    /// treated as failed.
    pub handshake_timeout: Duration,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            association_tombstone_ttl: Duration::from_secs(24 * 60 * 60),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
