//! The UDP wire codec: fixed-layout datagrams, packed and parsed in network byte order.
//!
//! A datagram is silently dropped (never answered) when it fails to parse. Parsing failures
//! are represented by [`MalformedFrame`] and never panic on attacker-controlled input.

use std::mem::size_of;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use utils::bytes::{self, Cast};
use utils::endian::{u16be, u32be};

use crate::id::Identifier;
use crate::node::{is_zero_v4, is_zero_v6, Domain, Endpoint, NatState, Node};

/// Fixed magic value identifying datagrams of this protocol.
pub const MAGIC: u16 = 0xca6e;
pub const VERSION: u16 = 1;

/// Shortlist width, and the number of neighbors a node publishes itself to.
pub const NUM_FIND_NODE: usize = 6;

const RECORD_V4_LEN: usize = size_of::<NodeRecordV4>();
const RECORD_V6_LEN: usize = size_of::<NodeRecordV6>();

/// Every way a datagram can fail to parse. Always results in a silent drop, never a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedFrame {
	BadMagic,
	BadVersion,
	BadLength,
	BadType,
	BadDomain,
	BadDestination,
}

fn checked_cast<T: Cast>(buf: &[u8]) -> Result<&T, MalformedFrame> {
	if buf.len() < size_of::<T>() {
		return Err(MalformedFrame::BadLength);
	}

	Ok(bytes::cast(&buf[..size_of::<T>()]))
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MessageType {
	Ping,
	PingReply,
	FindNode,
	FindNodeReply,
	FindValue,
	FindValueReply,
	Register,
}

impl MessageType {
	fn code(self) -> u16 {
		match self {
			MessageType::Ping => 0,
			MessageType::PingReply => 1,
			MessageType::FindNode => 2,
			MessageType::FindNodeReply => 3,
			MessageType::FindValue => 4,
			MessageType::FindValueReply => 5,
			MessageType::Register => 6,
		}
	}

	fn from_code(code: u16) -> Result<Self, MalformedFrame> {
		Ok(match code {
			0 => MessageType::Ping,
			1 => MessageType::PingReply,
			2 => MessageType::FindNode,
			3 => MessageType::FindNodeReply,
			4 => MessageType::FindValue,
			5 => MessageType::FindValueReply,
			6 => MessageType::Register,
			_ => return Err(MalformedFrame::BadType),
		})
	}
}

#[derive(Cast)]
#[repr(C)]
struct Header {
	magic: u16be,
	version: u16be,
	ty: u16be,
	src: Identifier,
	dst: Identifier,
}

#[derive(Cast)]
#[repr(C)]
struct PingBody {
	header: Header,
	nonce: u32be,
}

#[derive(Cast)]
#[repr(C)]
struct FindNvBody {
	header: Header,
	nonce: u32be,
	domain: u16be,
	state: u16be,
	target: Identifier,
}

#[derive(Cast)]
#[repr(C)]
struct FindNodeReplyBody {
	header: Header,
	nonce: u32be,
	domain: u16be,
	target: Identifier,
	num: u8,
}

#[derive(Cast)]
#[repr(C)]
struct FindValueReplyBody {
	header: Header,
	nonce: u32be,
	domain: u16be,
	target: Identifier,
	num: u8,
	flag: u8,
}

#[derive(Cast)]
#[repr(C)]
struct RegisterBody {
	header: Header,
	session: u32be,
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
struct NodeRecordV4 {
	port: u16be,
	addr: [u8; 4],
	id: Identifier,
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
struct NodeRecordV6 {
	port: u16be,
	addr: [u8; 16],
	id: Identifier,
}

fn domain_code(domain: Domain) -> u16 {
	match domain {
		Domain::Inet => 0,
		Domain::Inet6 => 1,
	}
}

fn domain_from_code(code: u16) -> Result<Domain, MalformedFrame> {
	match code {
		0 => Ok(Domain::Inet),
		1 => Ok(Domain::Inet6),
		_ => Err(MalformedFrame::BadDomain),
	}
}

fn state_code(state: NatState) -> u16 {
	match state {
		NatState::Global => 0,
		NatState::Nat => 1,
	}
}

fn state_from_code(code: u16) -> NatState {
	if code == 0 {
		NatState::Global
	} else {
		NatState::Nat
	}
}

fn make_header(ty: MessageType, src: Identifier, dst: Identifier) -> Header {
	Header { magic: MAGIC.into(), version: VERSION.into(), ty: ty.code().into(), src, dst }
}

/// Checks the common header: magic, version, and that the destination is either `self_id`, or
/// (for find-node and find-value datagrams) the zero identifier.
fn check_header(header: &Header, self_id: Identifier, allow_zero_dst: bool) -> Result<(), MalformedFrame> {
	if header.magic.get() != MAGIC {
		return Err(MalformedFrame::BadMagic);
	}

	if header.version.get() != VERSION {
		return Err(MalformedFrame::BadVersion);
	}

	let dst = header.dst;

	if dst != self_id && !(allow_zero_dst && dst.is_zero()) {
		return Err(MalformedFrame::BadDestination);
	}

	Ok(())
}

fn encode_record(node: &Node, src: SocketAddr) -> Vec<u8> {
	let domain = node.endpoint.domain();
	let addr = if node.endpoint.is_loopback_record() { src } else { node.endpoint.resolve(src) };

	match domain {
		Domain::Inet => {
			let v4 = match addr.ip() {
				IpAddr::V4(v4) => v4,
				IpAddr::V6(v6) => v6.to_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED),
			};

			let record = NodeRecordV4 { port: addr.port().into(), addr: v4.octets(), id: node.id };
			bytes::as_slice::<u8, _>(&record).to_vec()
		}
		Domain::Inet6 => {
			let v6 = match addr.ip() {
				IpAddr::V6(v6) => v6,
				IpAddr::V4(v4) => v4.to_ipv6_mapped(),
			};

			let record = NodeRecordV6 { port: addr.port().into(), addr: v6.octets(), id: node.id };
			bytes::as_slice::<u8, _>(&record).to_vec()
		}
	}
}

fn encode_records(domain: Domain, nodes: &[Node], src: SocketAddr) -> Vec<u8> {
	let mut out = Vec::with_capacity(nodes.len() * if domain == Domain::Inet { RECORD_V4_LEN } else { RECORD_V6_LEN });

	for node in nodes {
		out.extend(encode_record(node, src));
	}

	out
}

fn decode_records(domain: Domain, num: u8, buf: &[u8]) -> Result<Vec<Node>, MalformedFrame> {
	let num = num as usize;

	match domain {
		Domain::Inet => {
			if buf.len() != num * RECORD_V4_LEN {
				return Err(MalformedFrame::BadLength);
			}

			let records: &[NodeRecordV4] = bytes::as_slice(buf);

			Ok(records
				.iter()
				.map(|r| {
					let addr = Ipv4Addr::from(r.addr);
					let port = r.port.get();

					let endpoint = if is_zero_v4(addr, port) {
						Endpoint::Loopback(Domain::Inet)
					} else {
						Endpoint::Inet(SocketAddr::new(addr.into(), port))
					};

					Node::new(r.id, endpoint)
				})
				.collect())
		}
		Domain::Inet6 => {
			if buf.len() != num * RECORD_V6_LEN {
				return Err(MalformedFrame::BadLength);
			}

			let records: &[NodeRecordV6] = bytes::as_slice(buf);

			Ok(records
				.iter()
				.map(|r| {
					let addr = Ipv6Addr::from(r.addr);
					let port = r.port.get();

					let endpoint = if is_zero_v6(addr, port) {
						Endpoint::Loopback(Domain::Inet6)
					} else {
						Endpoint::Inet6(SocketAddr::new(addr.into(), port))
					};

					Node::new(r.id, endpoint)
				})
				.collect())
		}
	}
}

/// A datagram, parsed just enough to dispatch it to a handler.
pub enum Frame {
	Ping { nonce: u32, src_id: Identifier },
	PingReply { nonce: u32, src_id: Identifier },
	FindNode { nonce: u32, domain: Domain, state: NatState, target: Identifier, src_id: Identifier },
	FindNodeReply { nonce: u32, domain: Domain, target: Identifier, nodes: Vec<Node>, src_id: Identifier },
	FindValue { nonce: u32, domain: Domain, state: NatState, target: Identifier, src_id: Identifier },
	FindValueReply { nonce: u32, domain: Domain, target: Identifier, flag: bool, nodes: Vec<Node>, src_id: Identifier },
	Register { session: u32, src_id: Identifier },
}

/// Parses a raw datagram addressed to `self_id`.
pub fn decode(buf: &[u8], self_id: Identifier) -> Result<Frame, MalformedFrame> {
	let header: &Header = checked_cast(buf)?;
	let ty = MessageType::from_code(header.ty.get())?;

	let allow_zero_dst = matches!(ty, MessageType::FindNode);
	check_header(header, self_id, allow_zero_dst)?;

	match ty {
		MessageType::Ping => {
			let body: &PingBody = checked_cast(buf)?;

			if buf.len() != size_of::<PingBody>() {
				return Err(MalformedFrame::BadLength);
			}

			Ok(Frame::Ping { nonce: body.nonce.get(), src_id: body.header.src })
		}
		MessageType::PingReply => {
			let body: &PingBody = checked_cast(buf)?;

			if buf.len() != size_of::<PingBody>() {
				return Err(MalformedFrame::BadLength);
			}

			Ok(Frame::PingReply { nonce: body.nonce.get(), src_id: body.header.src })
		}
		MessageType::FindNode | MessageType::FindValue => {
			let body: &FindNvBody = checked_cast(buf)?;

			if buf.len() != size_of::<FindNvBody>() {
				return Err(MalformedFrame::BadLength);
			}

			let domain = domain_from_code(body.domain.get())?;
			let state = state_from_code(body.state.get());
			let nonce = body.nonce.get();
			let target = body.target;
			let src_id = body.header.src;

			Ok(if ty == MessageType::FindNode {
				Frame::FindNode { nonce, domain, state, target, src_id }
			} else {
				Frame::FindValue { nonce, domain, state, target, src_id }
			})
		}
		MessageType::FindNodeReply => {
			let body: &FindNodeReplyBody = checked_cast(buf)?;

			let base = size_of::<FindNodeReplyBody>();
			let domain = domain_from_code(body.domain.get())?;
			let nodes = decode_records(domain, body.num, &buf[base..])?;

			Ok(Frame::FindNodeReply { nonce: body.nonce.get(), domain, target: body.target, nodes, src_id: body.header.src })
		}
		MessageType::FindValueReply => {
			let body: &FindValueReplyBody = checked_cast(buf)?;

			let base = size_of::<FindValueReplyBody>();
			let domain = domain_from_code(body.domain.get())?;
			let nodes = decode_records(domain, body.num, &buf[base..])?;

			Ok(Frame::FindValueReply {
				nonce: body.nonce.get(),
				domain,
				target: body.target,
				flag: body.flag != 0,
				nodes,
				src_id: body.header.src,
			})
		}
		MessageType::Register => {
			let body: &RegisterBody = checked_cast(buf)?;

			if buf.len() != size_of::<RegisterBody>() {
				return Err(MalformedFrame::BadLength);
			}

			Ok(Frame::Register { session: body.session.get(), src_id: body.header.src })
		}
	}
}

pub fn encode_ping(src: Identifier, dst: Identifier, nonce: u32) -> Vec<u8> {
	let body = PingBody { header: make_header(MessageType::Ping, src, dst), nonce: nonce.into() };
	bytes::as_slice::<u8, _>(&body).to_vec()
}

pub fn encode_ping_reply(src: Identifier, dst: Identifier, nonce: u32) -> Vec<u8> {
	let body = PingBody { header: make_header(MessageType::PingReply, src, dst), nonce: nonce.into() };
	bytes::as_slice::<u8, _>(&body).to_vec()
}

#[allow(clippy::too_many_arguments)]
fn encode_find_nv(ty: MessageType, src: Identifier, dst: Identifier, nonce: u32, domain: Domain, state: NatState, target: Identifier) -> Vec<u8> {
	let body = FindNvBody {
		header: make_header(ty, src, dst),
		nonce: nonce.into(),
		domain: domain_code(domain).into(),
		state: state_code(state).into(),
		target,
	};

	bytes::as_slice::<u8, _>(&body).to_vec()
}

pub fn encode_find_node(src: Identifier, dst: Identifier, nonce: u32, domain: Domain, state: NatState, target: Identifier) -> Vec<u8> {
	encode_find_nv(MessageType::FindNode, src, dst, nonce, domain, state, target)
}

pub fn encode_find_value(src: Identifier, dst: Identifier, nonce: u32, domain: Domain, state: NatState, target: Identifier) -> Vec<u8> {
	encode_find_nv(MessageType::FindValue, src, dst, nonce, domain, state, target)
}

pub fn encode_find_node_reply(src: Identifier, dst: Identifier, nonce: u32, domain: Domain, target: Identifier, nodes: &[Node], local: SocketAddr) -> Vec<u8> {
	let body = FindNodeReplyBody {
		header: make_header(MessageType::FindNodeReply, src, dst),
		nonce: nonce.into(),
		domain: domain_code(domain).into(),
		target,
		num: nodes.len() as u8,
	};

	let mut out = bytes::as_slice::<u8, _>(&body).to_vec();
	out.extend(encode_records(domain, nodes, local));
	out
}

#[allow(clippy::too_many_arguments)]
pub fn encode_find_value_reply(
	src: Identifier,
	dst: Identifier,
	nonce: u32,
	domain: Domain,
	target: Identifier,
	flag: bool,
	nodes: &[Node],
	local: SocketAddr,
) -> Vec<u8> {
	let body = FindValueReplyBody {
		header: make_header(MessageType::FindValueReply, src, dst),
		nonce: nonce.into(),
		domain: domain_code(domain).into(),
		target,
		num: nodes.len() as u8,
		flag: flag as u8,
	};

	let mut out = bytes::as_slice::<u8, _>(&body).to_vec();
	out.extend(encode_records(domain, nodes, local));
	out
}

pub fn encode_register(src: Identifier, dst: Identifier, session: u32) -> Vec<u8> {
	let body = RegisterBody { header: make_header(MessageType::Register, src, dst), session: session.into() };
	bytes::as_slice::<u8, _>(&body).to_vec()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(last: u8) -> Identifier {
		let mut bytes = [0u8; 20];
		bytes[19] = last;
		Identifier::from_bytes(bytes)
	}

	#[test]
	fn register_roundtrip() {
		let buf = encode_register(id(1), id(2), 0xdead_beef);
		let frame = decode(&buf, id(2)).unwrap();

		match frame {
			Frame::Register { session, src_id } => {
				assert_eq!(session, 0xdead_beef);
				assert_eq!(src_id, id(1));
			}
			_ => panic!("wrong frame type"),
		}
	}

	#[test]
	fn find_node_to_zero_destination_is_accepted() {
		let buf = encode_find_node(id(1), Identifier::ZERO, 7, Domain::Inet, NatState::Global, id(9));
		let frame = decode(&buf, id(42)).unwrap();
		assert!(matches!(frame, Frame::FindNode { nonce: 7, .. }));
	}

	#[test]
	fn ping_to_zero_destination_is_rejected() {
		let buf = encode_ping(id(1), Identifier::ZERO, 7);
		assert_eq!(decode(&buf, id(42)), Err(MalformedFrame::BadDestination));
	}

	#[test]
	fn truncated_frame_is_malformed() {
		let buf = encode_register(id(1), id(2), 1);
		assert_eq!(decode(&buf[..buf.len() - 1], id(2)), Err(MalformedFrame::BadLength));
	}

	#[test]
	fn overlong_frame_is_malformed() {
		let mut buf = encode_register(id(1), id(2), 1);
		buf.push(0);
		assert_eq!(decode(&buf, id(2)), Err(MalformedFrame::BadLength));
	}

	#[test]
	fn find_node_reply_to_zero_destination_is_rejected() {
		let local = SocketAddr::new(std::net::Ipv4Addr::new(127, 0, 0, 1).into(), 4000);
		let buf = encode_find_node_reply(id(1), Identifier::ZERO, 7, Domain::Inet, id(9), &[], local);
		assert_eq!(decode(&buf, id(42)), Err(MalformedFrame::BadDestination));
	}

	#[test]
	fn find_node_reply_roundtrips_with_nodes() {
		use std::net::{Ipv4Addr, SocketAddr};

		let local = SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 4000);
		let n1 = Node::new(id(5), Endpoint::Inet(SocketAddr::new(Ipv4Addr::new(10, 0, 0, 1).into(), 9000)));
		let n2 = Node::new(id(6), Endpoint::Loopback(Domain::Inet));

		let buf = encode_find_node_reply(id(1), id(2), 3, Domain::Inet, id(9), &[n1, n2], local);
		let frame = decode(&buf, id(2)).unwrap();

		match frame {
			Frame::FindNodeReply { nodes, .. } => {
				assert_eq!(nodes.len(), 2);
				assert_eq!(nodes[0].id, id(5));
				assert_eq!(nodes[1].endpoint, Endpoint::Loopback(Domain::Inet));
			}
			_ => panic!("wrong frame type"),
		}
	}

	#[test]
	fn declared_length_mismatch_is_rejected() {
		let local = SocketAddr::new(std::net::Ipv4Addr::new(127, 0, 0, 1).into(), 4000);
		let n1 = Node::new(id(5), Endpoint::Inet(SocketAddr::new(std::net::Ipv4Addr::new(10, 0, 0, 1).into(), 9000)));

		let mut buf = encode_find_node_reply(id(1), id(2), 3, Domain::Inet, id(9), &[n1], local);
		buf.truncate(buf.len() - 1);

		assert_eq!(decode(&buf, id(2)), Err(MalformedFrame::BadLength));
	}
}
