//! The DHT actor and its iterative lookup engine: `find_node_by_endpoint`, `find_node`,
//! `find_value`, and the probe-reply/probe-timeout machinery that drives them.

use std::net::{SocketAddr, ToSocketAddrs};

use log::{debug, trace, warn};
use rand::rngs::ThreadRng;
use rand::{thread_rng, Rng};
use stakker::{fwd_to, CX};

use runtime::Io;

use crate::collab::{NatDetector, Peers, RoutingTable};
use crate::directory::Directory;
use crate::id::Identifier;
use crate::nat::FixedNatDetector;
use crate::node::{Domain, Endpoint, NatState, Node};
use crate::peers::DefaultPeers;
use crate::query::{Continuation, ProbeKey, Query, QueryTable, QUERY_TIMEOUT};
use crate::routing::LinearRoutingTable;
use crate::wire::{self, Frame};

/// The DHT core: the lookup engine, request handlers, registration loop, and the collaborators
/// they share, all owned by a single actor so access never needs a lock.
pub struct Dht {
	pub(crate) self_id: Identifier,
	pub(crate) domain: Domain,
	pub(crate) local_addr: SocketAddr,
	pub(crate) io: Io,
	pub(crate) routing_table: Box<dyn RoutingTable>,
	pub(crate) peers: Box<dyn Peers>,
	pub(crate) nat: Box<dyn NatDetector>,
	pub(crate) directory: Directory,
	pub(crate) queries: QueryTable,
	pub(crate) rng: ThreadRng,
	pub(crate) session: u32,
	pub(crate) registering: bool,
	pub(crate) register_timer: Option<stakker::FixedTimerKey>,
}

impl Dht {
	/// Binds a UDP socket at `bind_addr` and constructs the actor around it. `nat_global`
	/// seeds the default NAT detector; swap in [`crate::collab::NatDetector`] for real detection.
	pub fn init(cx: CX![], bind_addr: SocketAddr, self_id: Identifier, nat_global: bool) -> Option<Self> {
		let socket = match std::net::UdpSocket::bind(bind_addr) {
			Ok(socket) => socket,
			Err(err) => {
				log::error!("Failed to bind {bind_addr}: {err}");
				return None;
			}
		};

		let local_addr = socket.local_addr().unwrap_or(bind_addr);
		let domain = if local_addr.is_ipv6() { Domain::Inet6 } else { Domain::Inet };

		let this = cx.this().clone();
		let fwd = fwd_to!([this], recv_datagram() as (SocketAddr, Vec<u8>));

		let io = match Io::new(socket, fwd) {
			Ok(io) => io,
			Err(()) => return None,
		};

		let mut rng = thread_rng();
		let session = rng.gen();

		Some(Self {
			self_id,
			domain,
			local_addr,
			io,
			routing_table: Box::new(LinearRoutingTable::new(self_id)),
			peers: Box::new(DefaultPeers::new()),
			nat: Box::new(FixedNatDetector::new(nat_global)),
			directory: Directory::new(),
			queries: QueryTable::new(),
			rng,
			session,
			registering: false,
			register_timer: None,
		})
	}

	pub(crate) fn nat_state(&self) -> NatState {
		if self.nat.is_global() {
			NatState::Global
		} else {
			NatState::Nat
		}
	}

	pub(crate) fn send(&self, dst: SocketAddr, buf: Vec<u8>) {
		if let Err(()) = self.io.write(dst, buf) {
			warn!("Failed to send datagram to {dst}");
		}
	}

	/// Issues find-node/find-value datagrams to up to `ALPHA` unqueried shortlist entries.
	/// Terminates the query in place if nothing remains to probe.
	fn send_round(&mut self, cx: CX![], nonce: u32) {
		let Some(query) = self.queries.get_mut(nonce) else { return };
		let targets = query.next_round();

		if targets.is_empty() && query.is_exhausted() {
			self.finish_query(cx, nonce, None);
			return;
		}

		let find_value = query.find_value;
		let target = query.target;
		let domain = query.domain;

		for id in targets {
			let Some(node) = self.queries.get_mut(nonce).and_then(|q| q.node(id)) else { continue };
			let addr = node.endpoint.resolve(self.local_addr);

			let buf = if find_value {
				wire::encode_find_value(self.self_id, id, nonce, domain, self.nat_state(), target)
			} else {
				wire::encode_find_node(self.self_id, id, nonce, domain, self.nat_state(), target)
			};

			self.send(addr, buf);

			let this = cx.this().clone();
			let key = ProbeKey::ById(id);
			let timer = cx.after(QUERY_TIMEOUT, move |cx| {
				this.apply(cx, move |this, cx| this.on_probe_timeout(cx, nonce, key));
			});

			if let Some(query) = self.queries.get_mut(nonce) {
				query.in_flight.insert(key, timer);
			}
		}
	}

	fn finish_query(&mut self, cx: CX![], nonce: u32, found: Option<Node>) {
		let Some(mut query) = self.queries.remove(nonce) else { return };

		for (_, timer) in query.in_flight.drain() {
			cx.timer_del(timer);
		}

		query.finish(found);
	}

	/// Iterative node lookup against the local routing table, falling back to the network.
	pub fn find_node(&mut self, cx: CX![], target: Identifier, ret: stakker::Ret<Vec<Node>>) {
		let local = self.routing_table.lookup(target, crate::wire::NUM_FIND_NODE);

		if !local.is_empty() {
			ret.ret(local);
			return;
		}

		let self_id = self.self_id;
		let nonce = self.queries.insert(&mut self.rng, |nonce| Query::new(nonce, target, self_id, self.domain, false, Continuation::FindNode(ret), Vec::new()));

		self.send_round(cx, nonce);
	}

	/// Iterative value lookup: returns the registered node for `target`, if any responder has it.
	pub fn find_value(&mut self, cx: CX![], target: Identifier, ret: stakker::Ret<Option<Node>>) {
		let local = self.routing_table.lookup(target, crate::wire::NUM_FIND_NODE);

		if !local.is_empty() {
			ret.ret(None);
			return;
		}

		let self_id = self.self_id;
		let nonce = self.queries.insert(&mut self.rng, |nonce| Query::new(nonce, target, self_id, self.domain, true, Continuation::FindValue(ret), Vec::new()));

		self.send_round(cx, nonce);
	}

	/// Bootstraps against a node of unknown identity: one probe to `(host, port)` tagged with
	/// the zero identifier, seeking `self_id` so the responder's own neighbors come back.
	pub fn find_node_by_endpoint(&mut self, cx: CX![], host: String, port: u16, ret: stakker::Ret<Vec<Node>>) {
		let Some(addr) = (host.as_str(), port).to_socket_addrs().ok().and_then(|mut it| it.next()) else {
			debug!("Could not resolve bootstrap endpoint {host}:{port}");
			ret.ret(Vec::new());
			return;
		};

		let target = self.self_id;
		let domain = self.domain;
		let nonce = self.queries.insert(&mut self.rng, |nonce| Query::new(nonce, target, target, domain, false, Continuation::FindNode(ret), Vec::new()));

		let buf = wire::encode_find_node(self.self_id, Identifier::ZERO, nonce, domain, self.nat_state(), target);
		self.send(addr, buf);

		let this = cx.this().clone();
		let timer = cx.after(QUERY_TIMEOUT, move |cx| {
			this.apply(cx, move |this, cx| this.on_probe_timeout(cx, nonce, ProbeKey::Bootstrap));
		});

		if let Some(query) = self.queries.get_mut(nonce) {
			query.in_flight.insert(ProbeKey::Bootstrap, timer);
		}
	}

	fn on_probe_timeout(&mut self, cx: CX![], nonce: u32, key: ProbeKey) {
		let Some(query) = self.queries.get_mut(nonce) else { return };
		query.in_flight.remove(&key);

		if let ProbeKey::ById(id) = key {
			query.demote(id);
			self.routing_table.remove(id);
			self.peers.add_timeout(id);
		}

		self.send_round(cx, nonce);
	}

	/// Common handling for find-node-reply and find-value-reply.
	pub(crate) fn handle_reply(&mut self, cx: CX![], from: SocketAddr, nonce: u32, target: Identifier, is_find_value: bool, flag: bool, nodes: Vec<Node>, src_id: Identifier) {
		let Some(query) = self.queries.get_mut(nonce) else {
			trace!("Dropping reply for unknown nonce {nonce}");
			return;
		};

		if query.target != target || query.find_value != is_find_value {
			trace!("Dropping reply for nonce {nonce}: target/type mismatch");
			return;
		}

		let Some(timer) = query.take_timer(src_id) else {
			trace!("Dropping unsolicited reply for nonce {nonce}");
			return;
		};

		cx.timer_del(timer);

		let responder = Node::new(src_id, Endpoint::from(from));
		self.routing_table.add(responder);
		self.peers.add_node(responder, None);

		let nodes: Vec<Node> = remap_loopback_records(nodes, from).into_iter().filter(|n| !self.peers.is_timeout(n.id)).collect();

		if is_find_value && flag {
			if let Some(found) = nodes.into_iter().next() {
				self.finish_query(cx, nonce, Some(found));
				return;
			}
		}

		let Some(query) = self.queries.get_mut(nonce) else { return };
		query.merge(nodes);

		self.send_round(cx, nonce);
	}

	pub fn recv_datagram(&mut self, cx: CX![], from: SocketAddr, buf: Vec<u8>) {
		let frame = match wire::decode(&buf, self.self_id) {
			Ok(frame) => frame,
			Err(err) => {
				trace!("Dropping malformed datagram from {from}: {err:?}");
				return;
			}
		};

		match frame {
			Frame::Ping { nonce, src_id } => self.recv_ping(cx, from, nonce, src_id),
			Frame::PingReply { nonce, src_id } => self.recv_ping_reply(cx, from, nonce, src_id),
			Frame::FindNode { nonce, domain, state, target, src_id } => self.recv_find_node(cx, from, nonce, domain, state, target, src_id),
			Frame::FindNodeReply { nonce, domain, target, nodes, src_id } => self.handle_reply(cx, from, nonce, target, false, false, nodes, src_id),
			Frame::FindValue { nonce, domain, state, target, src_id } => self.recv_find_value(cx, from, nonce, domain, state, target, src_id),
			Frame::FindValueReply { nonce, domain, target, flag, nodes, src_id } => self.handle_reply(cx, from, nonce, target, true, flag, nodes, src_id),
			Frame::Register { session, src_id } => self.recv_register(cx, from, session, src_id),
		}
	}
}

/// A reply's node list carries an all-zeros record to mean "this entry shares the datagram's
/// own source address" (the sender behind its own NAT can't name its public endpoint). Resolves
/// those records against `from` before the reply is merged into any shortlist.
fn remap_loopback_records(nodes: Vec<Node>, from: SocketAddr) -> Vec<Node> {
	nodes.into_iter().map(|n| if n.endpoint.is_loopback_record() { Node::new(n.id, Endpoint::from(from)) } else { n }).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{Ipv4Addr, SocketAddr};

	fn id(last: u8) -> Identifier {
		let mut bytes = [0u8; 20];
		bytes[19] = last;
		Identifier::from_bytes(bytes)
	}

	fn addr(port: u16) -> SocketAddr {
		SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), port)
	}

	#[test]
	fn remap_loopback_records_resolves_against_sender() {
		let from = addr(9000);
		let loopback_node = Node::new(id(1), Endpoint::Loopback(Domain::Inet));
		let resolved_node = Node::new(id(2), Endpoint::Inet(addr(4242)));

		let out = remap_loopback_records(vec![loopback_node, resolved_node], from);

		assert_eq!(out[0].endpoint, Endpoint::from(from));
		assert_eq!(out[1].endpoint, Endpoint::Inet(addr(4242)));
	}
}
