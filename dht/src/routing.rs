//! A default k-bucket-free routing table: the `k` nodes we have seen that are nearest to any
//! given identifier, found by a linear scan over a capped pool. Good enough for the reference
//! binary and for tests; production deployments are expected to supply their own
//! [`RoutingTable`](crate::collab::RoutingTable) backed by real k-buckets.

use std::collections::HashMap;

use crate::collab::RoutingTable;
use crate::id::Identifier;
use crate::node::Node;

/// Caps the table's total memory use; once full, the node farthest from `self_id` is evicted
/// to make room for a closer one.
const CAPACITY: usize = 4096;

pub struct LinearRoutingTable {
	self_id: Identifier,
	nodes: HashMap<Identifier, Node>,
}

impl LinearRoutingTable {
	pub fn new(self_id: Identifier) -> Self {
		Self { self_id, nodes: HashMap::new() }
	}
}

impl RoutingTable for LinearRoutingTable {
	fn lookup(&self, id: Identifier, k: usize) -> Vec<Node> {
		let mut candidates: Vec<Node> = self.nodes.values().copied().collect();
		candidates.sort_by_key(|n| id.distance(&n.id));
		candidates.truncate(k);
		candidates
	}

	fn add(&mut self, node: Node) {
		if node.id == self.self_id {
			return;
		}

		if self.nodes.len() >= CAPACITY && !self.nodes.contains_key(&node.id) {
			let farthest = self.nodes.values().map(|n| n.id).max_by_key(|id| self.self_id.distance(id));

			if let Some(farthest) = farthest {
				if self.self_id.distance(&farthest) < self.self_id.distance(&node.id) {
					return;
				}

				self.nodes.remove(&farthest);
			}
		}

		self.nodes.insert(node.id, node);
	}

	fn remove(&mut self, id: Identifier) {
		self.nodes.remove(&id);
	}

	fn recv_ping_reply(&mut self, node: Node, _nonce: u32) {
		self.add(node);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::Endpoint;
	use std::net::{Ipv4Addr, SocketAddr};

	fn id(last: u8) -> Identifier {
		let mut bytes = [0u8; 20];
		bytes[19] = last;
		Identifier::from_bytes(bytes)
	}

	fn node(last: u8) -> Node {
		Node::new(id(last), Endpoint::Inet(SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 1000 + last as u16)))
	}

	#[test]
	fn lookup_returns_closest_k() {
		let mut t = LinearRoutingTable::new(id(0));

		for i in 1..10 {
			t.add(node(i));
		}

		let found = t.lookup(id(0), 3);
		assert_eq!(found.len(), 3);
		assert!(found.windows(2).all(|w| id(0).distance(&w[0].id) <= id(0).distance(&w[1].id)));
	}

	#[test]
	fn self_is_never_added() {
		let mut t = LinearRoutingTable::new(id(0));
		t.add(node(0));
		assert!(t.lookup(id(0), 10).is_empty());
	}

	#[test]
	fn remove_forgets_node() {
		let mut t = LinearRoutingTable::new(id(0));
		t.add(node(1));
		t.remove(id(1));
		assert!(t.lookup(id(0), 10).is_empty());
	}
}
