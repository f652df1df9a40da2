//! Contracts for the collaborators the lookup engine and request handlers consume but do not
//! own: the routing table, the peers directory, and the NAT detector. Kept as traits so the
//! core stays decoupled from any one k-bucket or blacklist policy; [`routing`], [`peers`], and
//! [`nat`] supply default reference implementations.

use crate::id::Identifier;
use crate::node::Node;

/// An oracle over nodes near a given identifier. Also the sink for ping/ping-reply effects,
/// since a routing table typically uses liveness as its eviction signal.
pub trait RoutingTable {
	/// The `k` nodes closest to `id` that this table currently knows about, nearest first.
	fn lookup(&self, id: Identifier, k: usize) -> Vec<Node>;

	/// Learns of a node, inserting it subject to the table's own bucket policy.
	fn add(&mut self, node: Node);

	/// Forgets a node outright, e.g. after a probe timeout.
	fn remove(&mut self, id: Identifier);

	/// Delivered when a ping-reply is received from `node`, correlated by the `nonce` the
	/// ping carried. Routing tables typically use this to confirm liveness of a bucket entry.
	fn recv_ping_reply(&mut self, node: Node, nonce: u32);
}

/// A cache of recently-seen endpoints with a short-lived "don't bother" blacklist, independent
/// of the routing table's own eviction policy.
pub trait Peers {
	/// Records that `node` was seen alive, optionally tagged with a registration session.
	fn add_node(&mut self, node: Node, session: Option<u32>);

	/// Records that `id` failed to answer a probe in time.
	fn add_timeout(&mut self, id: Identifier);

	/// Whether `id` is currently blacklisted due to a recent timeout.
	fn is_timeout(&self, id: Identifier) -> bool;
}

/// Binary judgment of this process's own reachability.
pub trait NatDetector {
	fn is_global(&self) -> bool;
}
