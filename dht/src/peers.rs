//! A default peers directory: last-seen endpoints plus a short timeout blacklist, independent
//! of whatever eviction policy the routing table applies to the same identifiers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::collab::Peers;
use crate::id::Identifier;
use crate::node::Node;

/// How long a timed-out id stays blacklisted before it is eligible to be probed again.
const TIMEOUT_BLACKLIST: Duration = Duration::from_secs(30);

struct Seen {
	node: Node,
	session: Option<u32>,
}

pub struct DefaultPeers {
	seen: HashMap<Identifier, Seen>,
	timeouts: HashMap<Identifier, Instant>,
}

impl DefaultPeers {
	pub fn new() -> Self {
		Self { seen: HashMap::new(), timeouts: HashMap::new() }
	}
}

impl Default for DefaultPeers {
	fn default() -> Self {
		Self::new()
	}
}

impl Peers for DefaultPeers {
	fn add_node(&mut self, node: Node, session: Option<u32>) {
		self.seen.insert(node.id, Seen { node, session });
	}

	fn add_timeout(&mut self, id: Identifier) {
		self.timeouts.insert(id, Instant::now());
	}

	fn is_timeout(&self, id: Identifier) -> bool {
		match self.timeouts.get(&id) {
			Some(at) => at.elapsed() < TIMEOUT_BLACKLIST,
			None => false,
		}
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

	#[test]
	fn fresh_id_is_not_timed_out() {
		let peers = DefaultPeers::new();
		assert!(!peers.is_timeout(id(1)));
	}

	#[test]
	fn timed_out_id_is_blacklisted() {
		let mut peers = DefaultPeers::new();
		peers.add_timeout(id(1));
		assert!(peers.is_timeout(id(1)));
		assert!(!peers.is_timeout(id(2)));
	}

	#[test]
	fn add_node_records_session() {
		let mut peers = DefaultPeers::new();
		let node = Node::new(id(1), Endpoint::Inet(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 9000)));
		peers.add_node(node, Some(7));
		assert_eq!(peers.seen.get(&id(1)).and_then(|s| s.session), Some(7));
	}
}
