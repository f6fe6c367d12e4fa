//! Node identity: the network endpoint a remote system listens on, plus the
//! random incarnation tag that distinguishes one run of that system from
//! the next.

use std::fmt;

use rand_core::{OsRng, RngCore};

/// A network endpoint a remote actor system listens on.
///
/// Two `Node`s are equal iff all four fields match; `host:port` alone is
/// not a stable identity, since a dead process's address can be reused by
/// an unrelated one (see [`UniqueNode`]).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Node {
    pub protocol: String,
    pub system_name: String,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(system_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Node {
            protocol: "sact".to_owned(),
            system_name: system_name.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}@{}:{}", self.protocol, self.system_name, self.host, self.port)
    }
}

/// A 32-bit incarnation tag, drawn once per process run from a
/// cryptographic-quality RNG.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Draws a fresh, random incarnation tag.
    pub fn random() -> Self {
        NodeId(OsRng.next_u32())
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> NodeId {
        NodeId(id)
    }
}

impl From<NodeId> for u32 {
    #[inline]
    fn from(id: NodeId) -> u32 {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A [`Node`] paired with its incarnation. This, not `Node` alone, is the
/// identity an [`crate::association::Association`] is keyed by.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UniqueNode {
    pub node: Node,
    pub nid: NodeId,
}

impl UniqueNode {
    pub fn new(node: Node, nid: NodeId) -> Self {
        UniqueNode { node, nid }
    }

    /// The tuple tie-break order used to resolve concurrent handshakes:
    /// `(protocol, systemName, host, port, nid)`, lexicographic.
    fn tie_break_key(&self) -> (&str, &str, &str, u16, u32) {
        (
            &self.node.protocol,
            &self.node.system_name,
            &self.node.host,
            self.node.port,
            self.nid.0,
        )
    }

    /// Whether `self` wins tie-breaking against `other` (i.e. should proceed
    /// as the surviving handshake initiator when two offers race).
    pub fn wins_tie_break_against(&self, other: &UniqueNode) -> bool {
        self.tie_break_key() < other.tie_break_key()
    }
}

impl fmt::Display for UniqueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.nid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_is_antisymmetric() {
        let a = UniqueNode::new(Node::new("sys", "host", 1), NodeId::from(0x1111));
        let b = UniqueNode::new(Node::new("sys", "host", 1), NodeId::from(0x2222));

        assert!(a.wins_tie_break_against(&b));
        assert!(!b.wins_tie_break_against(&a));
    }
}
