//! Wire codec: hand-rolled big-endian encode/decode for the handshake and
//! envelope frames that cross the transport channel.
//!
//! Frames are self-delimiting (length-prefixed strings and payloads), so no
//! external framing is assumed beyond "the channel delivers whole frames" -
//! that guarantee is the transport's job, not this module's.

use std::convert::TryFrom;

use crate::address::ActorAddress;
use crate::envelope::SystemMessage;
use crate::error::{Error, ErrorKind, Result};
use crate::node::{Node, NodeId, UniqueNode};

const TAG_OFFER: u8 = 0x01;
const TAG_ACCEPT: u8 = 0x02;
const TAG_REJECT: u8 = 0x03;
const TAG_USER_ENVELOPE: u8 = 0x10;
const TAG_SYSTEM_ENVELOPE: u8 = 0x11;

const SYS_WATCH: u8 = 0;
const SYS_TERMINATED: u8 = 1;

/// Reason a handshake Offer was rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RejectReason {
    Duplicate,
    ConcurrentLost,
    Tombstoned,
    WrongTarget,
    Other,
}

impl RejectReason {
    fn code(self) -> u8 {
        match self {
            RejectReason::Duplicate => 1,
            RejectReason::ConcurrentLost => 2,
            RejectReason::Tombstoned => 3,
            RejectReason::WrongTarget => 4,
            RejectReason::Other => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => RejectReason::Duplicate,
            2 => RejectReason::ConcurrentLost,
            3 => RejectReason::Tombstoned,
            4 => RejectReason::WrongTarget,
            5 => RejectReason::Other,
            _ => return Err(Error::simple(ErrorKind::InvalidWireFormat)),
        })
    }
}

/// A decoded handshake or envelope frame.
pub enum Frame {
    Offer { sender: UniqueNode, target: UniqueNode },
    Accept { acceptor: UniqueNode },
    Reject { reason: RejectReason, message: String },
    UserEnvelope { recipient: ActorAddress, payload: Vec<u8> },
    SystemEnvelope { message: SystemMessage },
}

/// Context threaded explicitly through encode/decode so that an address
/// with no node (a local reference) can be qualified with the local node,
/// and so decoding can resolve addresses back into local proxies.
///
/// Passed as an explicit parameter rather than held as ambient state, so
/// callers that can't supply one get a compile error instead of a runtime
/// `MissingSerializationContext`.
pub trait SerializationContext {
    fn local_node(&self) -> &UniqueNode;
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(Error::simple(ErrorKind::InvalidWireFormat));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_string(&mut self) -> Result<String> {
        let len = self.take_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).simple(ErrorKind::InvalidWireFormat)
    }

    fn take_bytes(&mut self, len_prefix: usize) -> Result<Vec<u8>> {
        let len = match len_prefix {
            2 => self.take_u16()? as usize,
            4 => self.take_u32()? as usize,
            _ => unreachable!("unsupported length prefix width"),
        };
        Ok(self.take(len)?.to_vec())
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

use crate::error::ResultSimpleExt;

fn push_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    out.extend_from_slice(&(u16::try_from(bytes.len()).unwrap_or(u16::MAX)).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn push_bytes_u32(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(u32::try_from(bytes.len()).unwrap_or(u32::MAX)).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn encode_unique_node(out: &mut Vec<u8>, node: &UniqueNode) {
    push_string(out, &node.node.protocol);
    push_string(out, &node.node.system_name);
    push_string(out, &node.node.host);
    out.extend_from_slice(&node.node.port.to_be_bytes());
    out.extend_from_slice(&u32::from(node.nid).to_be_bytes());
}

fn decode_unique_node(cur: &mut Cursor) -> Result<UniqueNode> {
    let protocol = cur.take_string()?;
    let system_name = cur.take_string()?;
    let host = cur.take_string()?;
    let port = cur.take_u16()?;
    let nid = cur.take_u32()?;
    Ok(UniqueNode::new(
        Node { protocol, system_name, host, port },
        NodeId::from(nid),
    ))
}

fn encode_actor_address(out: &mut Vec<u8>, addr: &ActorAddress, ctx: &dyn SerializationContext) {
    match &addr.node {
        Some(node) => encode_unique_node(out, node),
        None => encode_unique_node(out, ctx.local_node()),
    }
    out.extend_from_slice(&(u16::try_from(addr.path.len()).unwrap_or(u16::MAX)).to_be_bytes());
    for segment in &addr.path {
        push_string(out, segment);
    }
    out.extend_from_slice(&addr.incarnation.to_be_bytes());
}

fn decode_actor_address(cur: &mut Cursor) -> Result<ActorAddress> {
    let node = decode_unique_node(cur)?;
    let count = cur.take_u16()? as usize;
    let mut path = Vec::with_capacity(count);
    for _ in 0..count {
        path.push(cur.take_string()?);
    }
    let incarnation = cur.take_u32()?;
    Ok(ActorAddress::new(Some(node), path, incarnation))
}

fn encode_system_message(out: &mut Vec<u8>, msg: &SystemMessage, ctx: &dyn SerializationContext) {
    match msg {
        SystemMessage::Watch { watchee, watcher } => {
            out.push(SYS_WATCH);
            encode_actor_address(out, watchee, ctx);
            encode_actor_address(out, watcher, ctx);
        }
        SystemMessage::Terminated { actor_ref, existence_confirmed, address_terminated } => {
            out.push(SYS_TERMINATED);
            encode_actor_address(out, actor_ref, ctx);
            out.push(*existence_confirmed as u8);
            out.push(*address_terminated as u8);
        }
    }
}

fn decode_system_message(cur: &mut Cursor) -> Result<SystemMessage> {
    match cur.take_u8()? {
        SYS_WATCH => {
            let watchee = decode_actor_address(cur)?;
            let watcher = decode_actor_address(cur)?;
            Ok(SystemMessage::Watch { watchee, watcher })
        }
        SYS_TERMINATED => {
            let actor_ref = decode_actor_address(cur)?;
            let existence_confirmed = cur.take_u8()? != 0;
            let address_terminated = cur.take_u8()? != 0;
            Ok(SystemMessage::Terminated { actor_ref, existence_confirmed, address_terminated })
        }
        _ => Err(Error::simple(ErrorKind::InvalidWireFormat)),
    }
}

/// Encodes a [`Frame`] to bytes. Addresses with no node are qualified
/// against `ctx.local_node()`.
pub fn encode_frame(frame: &Frame, ctx: &dyn SerializationContext) -> Vec<u8> {
    let mut out = Vec::new();
    match frame {
        Frame::Offer { sender, target } => {
            out.push(TAG_OFFER);
            encode_unique_node(&mut out, sender);
            encode_unique_node(&mut out, target);
        }
        Frame::Accept { acceptor } => {
            out.push(TAG_ACCEPT);
            encode_unique_node(&mut out, acceptor);
        }
        Frame::Reject { reason, message } => {
            out.push(TAG_REJECT);
            out.push(reason.code());
            push_string(&mut out, message);
        }
        Frame::UserEnvelope { recipient, payload } => {
            out.push(TAG_USER_ENVELOPE);
            encode_actor_address(&mut out, recipient, ctx);
            push_bytes_u32(&mut out, payload);
        }
        Frame::SystemEnvelope { message } => {
            out.push(TAG_SYSTEM_ENVELOPE);
            encode_system_message(&mut out, message, ctx);
        }
    }
    out
}

/// Decodes a [`Frame`] from bytes produced by [`encode_frame`].
pub fn decode_frame(bytes: &[u8], _ctx: &dyn SerializationContext) -> Result<Frame> {
    let mut cur = Cursor::new(bytes);
    let frame = match cur.take_u8()? {
        TAG_OFFER => {
            let sender = decode_unique_node(&mut cur)?;
            let target = decode_unique_node(&mut cur)?;
            Frame::Offer { sender, target }
        }
        TAG_ACCEPT => Frame::Accept { acceptor: decode_unique_node(&mut cur)? },
        TAG_REJECT => {
            let reason = RejectReason::from_code(cur.take_u8()?)?;
            let message = cur.take_string()?;
            Frame::Reject { reason, message }
        }
        TAG_USER_ENVELOPE => {
            let recipient = decode_actor_address(&mut cur)?;
            let payload = cur.take_bytes(4)?;
            Frame::UserEnvelope { recipient, payload }
        }
        TAG_SYSTEM_ENVELOPE => {
            let message = decode_system_message(&mut cur)?;
            Frame::SystemEnvelope { message }
        }
        _ => return Err(Error::simple(ErrorKind::InvalidWireFormat)),
    };
    if !cur.is_empty() {
        return Err(Error::simple(ErrorKind::InvalidWireFormat));
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCtx(UniqueNode);
    impl SerializationContext for FixedCtx {
        fn local_node(&self) -> &UniqueNode {
            &self.0
        }
    }

    fn local() -> UniqueNode {
        UniqueNode::new(Node::new("sys", "localhost", 7337), NodeId::from(1))
    }

    #[test]
    fn unique_node_round_trips() {
        let ctx = FixedCtx(local());
        let frame = Frame::Accept { acceptor: local() };
        let bytes = encode_frame(&frame, &ctx);
        match decode_frame(&bytes, &ctx).unwrap() {
            Frame::Accept { acceptor } => assert_eq!(acceptor, local()),
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn watch_round_trips() {
        let ctx = FixedCtx(local());
        let watchee = ActorAddress::new(Some(local()), vec!["user".into(), "a".into()], 1);
        let watcher = ActorAddress::new(Some(local()), vec!["user".into(), "b".into()], 1);
        let frame = Frame::SystemEnvelope {
            message: SystemMessage::Watch { watchee: watchee.clone(), watcher: watcher.clone() },
        };
        let bytes = encode_frame(&frame, &ctx);
        match decode_frame(&bytes, &ctx).unwrap() {
            Frame::SystemEnvelope { message: SystemMessage::Watch { watchee: w, watcher: wr } } => {
                assert_eq!(w, watchee);
                assert_eq!(wr, watcher);
            }
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn reject_round_trips_with_reason() {
        let ctx = FixedCtx(local());
        let frame = Frame::Reject { reason: RejectReason::Tombstoned, message: "gone".into() };
        let bytes = encode_frame(&frame, &ctx);
        match decode_frame(&bytes, &ctx).unwrap() {
            Frame::Reject { reason, message } => {
                assert_eq!(reason, RejectReason::Tombstoned);
                assert_eq!(message, "gone");
            }
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let ctx = FixedCtx(local());
        let bytes = [TAG_ACCEPT, 0, 1];
        assert!(decode_frame(&bytes, &ctx).is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let ctx = FixedCtx(local());
        let bytes = [0xff];
        assert!(decode_frame(&bytes, &ctx).is_err());
    }
}
