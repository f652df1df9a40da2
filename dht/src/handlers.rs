//! Request handlers: dispatch-on-type responders for inbound ping / find-node / find-value /
//! register datagrams. Mutates the routing table and registered-nodes directory; for replies,
//! resumes an in-flight query via [`Dht::handle_reply`](crate::engine::Dht::handle_reply).

use std::net::SocketAddr;

use log::trace;
use stakker::CX;

use crate::collab::{Peers, RoutingTable};
use crate::engine::Dht;
use crate::id::Identifier;
use crate::node::{Domain, Endpoint, NatState, Node};
use crate::wire::{self, NUM_FIND_NODE};

impl Dht {
	/// Inserts the requester into the routing table only if it claims global reachability; it
	/// is always added to the peers cache regardless.
	fn note_requester(&mut self, id: Identifier, from: SocketAddr, state: NatState) {
		let node = Node::new(id, Endpoint::from(from));

		if state == NatState::Global {
			self.routing_table.add(node);
		}

		self.peers.add_node(node, None);
	}

	pub(crate) fn recv_ping(&mut self, _cx: CX![], from: SocketAddr, nonce: u32, src_id: Identifier) {
		self.peers.add_node(Node::new(src_id, Endpoint::from(from)), None);

		let buf = wire::encode_ping_reply(self.self_id, src_id, nonce);
		self.send(from, buf);
	}

	pub(crate) fn recv_ping_reply(&mut self, _cx: CX![], from: SocketAddr, nonce: u32, src_id: Identifier) {
		let node = Node::new(src_id, Endpoint::from(from));
		self.peers.add_node(node, None);
		self.routing_table.recv_ping_reply(node, nonce);
	}

	pub(crate) fn recv_find_node(&mut self, _cx: CX![], from: SocketAddr, nonce: u32, domain: Domain, state: NatState, target: Identifier, src_id: Identifier) {
		if domain != self.domain {
			trace!("Dropping find-node from {from}: domain mismatch");
			return;
		}

		self.note_requester(src_id, from, state);

		let nodes = self.routing_table.lookup(target, NUM_FIND_NODE);
		let buf = wire::encode_find_node_reply(self.self_id, src_id, nonce, self.domain, target, &nodes, from);
		self.send(from, buf);
	}

	pub(crate) fn recv_find_value(&mut self, _cx: CX![], from: SocketAddr, nonce: u32, domain: Domain, state: NatState, target: Identifier, src_id: Identifier) {
		if domain != self.domain {
			trace!("Dropping find-value from {from}: domain mismatch");
			return;
		}

		self.note_requester(src_id, from, state);

		let buf = match self.directory.get(target) {
			Some(reg) => {
				let node = Node::new(target, reg.endpoint);
				wire::encode_find_value_reply(self.self_id, src_id, nonce, self.domain, target, true, &[node], from)
			}
			None => {
				let nodes = self.routing_table.lookup(target, NUM_FIND_NODE);
				wire::encode_find_value_reply(self.self_id, src_id, nonce, self.domain, target, false, &nodes, from)
			}
		};

		self.send(from, buf);
	}

	pub(crate) fn recv_register(&mut self, _cx: CX![], from: SocketAddr, session: u32, src_id: Identifier) {
		self.directory.register(src_id, Endpoint::from(from), session);
		self.peers.add_node(Node::new(src_id, Endpoint::from(from)), Some(session));
	}
}
