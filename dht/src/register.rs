//! The registration loop: periodically finds the nodes closest to our own id and publishes our
//! endpoint to them, so a remote `find_value` for our id converges on an endpoint that answers.

use std::time::Duration;

use stakker::{ret_to, CX};

use crate::engine::Dht;
use crate::node::Node;
use crate::wire;

/// Bounds how long a registration may hold the `registering` flag if its find-node callback is
/// ever lost, so a crashed or stalled lookup cannot wedge the loop shut forever.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

impl Dht {
	/// Kicks off a registration pass unless one is already in flight.
	pub fn register_node(&mut self, cx: CX![]) {
		if self.registering {
			return;
		}

		self.registering = true;

		let this = cx.this().clone();
		let guard = cx.after(REGISTER_TIMEOUT, move |cx| {
			this.apply(cx, |this, _cx| this.registering = false);
		});
		self.register_timer = Some(guard);

		let self_id = self.self_id;
		let this = cx.this().clone();
		let ret = ret_to!([this], on_register_complete() as (Vec<Node>));
		self.find_node(cx, self_id, ret);
	}

	fn on_register_complete(&mut self, cx: CX![], nodes: Vec<Node>) {
		if let Some(timer) = self.register_timer.take() {
			cx.timer_del(timer);
		}

		self.registering = false;

		for node in registration_targets(nodes, self.self_id) {
			let addr = node.endpoint.resolve(self.local_addr);
			let buf = wire::encode_register(self.self_id, node.id, self.session);
			self.send(addr, buf);
		}
	}
}

/// A find-node for our own id can return ourselves among the closest nodes (e.g. if the local
/// routing table already holds us); never publish a registration to ourselves.
fn registration_targets(nodes: Vec<Node>, self_id: crate::id::Identifier) -> Vec<Node> {
	nodes.into_iter().filter(|n| n.id != self_id).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::Endpoint;
	use std::net::{Ipv4Addr, SocketAddr};

	fn id(last: u8) -> crate::id::Identifier {
		let mut bytes = [0u8; 20];
		bytes[19] = last;
		crate::id::Identifier::from_bytes(bytes)
	}

	fn node(last: u8) -> Node {
		Node::new(id(last), Endpoint::Inet(SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 1000 + last as u16)))
	}

	#[test]
	fn registration_targets_excludes_self() {
		let self_id = id(1);
		let out = registration_targets(vec![node(1), node(2), node(3)], self_id);

		assert_eq!(out.len(), 2);
		assert!(out.iter().all(|n| n.id != self_id));
	}
}
