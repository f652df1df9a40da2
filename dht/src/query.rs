//! The query table: outstanding iterative lookups, keyed by a random correlation nonce.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use stakker::{FixedTimerKey, Ret};

use crate::id::{Distance, Identifier};
use crate::node::{Domain, Node};
use crate::wire::NUM_FIND_NODE;

/// Concurrency of outstanding find-node/find-value requests per lookup step.
pub const ALPHA: usize = 3;
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// What a lookup does with its final answer. Kept as a tagged sum rather than a trait object:
/// there are exactly two shapes of result, and a lookup always knows up front which one it owes.
pub enum Continuation {
	FindNode(Ret<Vec<Node>>),
	FindValue(Ret<Option<Node>>),
}

impl Continuation {
	/// Invokes the callback appropriate to this continuation's shape. If a find-value lookup
	/// exhausts its shortlist without success, `found` is `None`.
	fn resolve(self, nodes: Vec<Node>, found: Option<Node>) {
		match self {
			Continuation::FindNode(ret) => ret.ret(nodes),
			Continuation::FindValue(ret) => ret.ret(found),
		}
	}
}

/// One candidate in a lookup's shortlist, ordered by distance to the lookup target.
pub struct ShortlistEntry {
	pub node: Node,
	pub distance: Distance,
	/// Set once a find-node/find-value has been sent to this candidate.
	pub queried: bool,
}

/// Identifies one outstanding probe. A bootstrap probe has no known responder id yet, so it
/// cannot be keyed by [`Identifier`] the way a normal shortlist probe is; rather than overload
/// the identifier space with an all-zeros sentinel, the two cases are named explicitly.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKey {
	ById(Identifier),
	Bootstrap,
}

/// An in-progress iterative lookup: either a node lookup, or a value lookup that also accepts
/// an early "found it" answer from any responder along the way.
pub struct Query {
	pub nonce: u32,
	pub target: Identifier,
	/// Our own id. Never allowed into the shortlist: a reply that happens to include us must
	/// not turn into a later probe from ourselves to ourselves.
	pub self_id: Identifier,
	pub domain: Domain,
	pub find_value: bool,
	pub shortlist: Vec<ShortlistEntry>,
	/// One pending timer per outstanding probe.
	pub in_flight: HashMap<ProbeKey, FixedTimerKey>,
	continuation: Option<Continuation>,
}

impl Query {
	#[allow(clippy::too_many_arguments)]
	pub fn new(nonce: u32, target: Identifier, self_id: Identifier, domain: Domain, find_value: bool, continuation: Continuation, seeds: Vec<Node>) -> Self {
		let mut query = Self {
			nonce,
			target,
			self_id,
			domain,
			find_value,
			shortlist: Vec::new(),
			in_flight: HashMap::new(),
			continuation: Some(continuation),
		};

		query.merge(seeds);
		query
	}

	/// Merges newly-seen nodes into the shortlist, keeping it sorted by distance to the target
	/// and capped at [`NUM_FIND_NODE`]. Nodes already present (by id) are left untouched so an
	/// in-flight `queried` flag survives a responder re-announcing itself. `self_id` is always
	/// excluded, not just `target`: a find-node/find-value lookup for some other target can
	/// still receive a reply whose node list includes us.
	pub fn merge(&mut self, nodes: Vec<Node>) {
		for node in nodes {
			if node.id == self.target || node.id == self.self_id || self.shortlist.iter().any(|e| e.node.id == node.id) {
				continue;
			}

			let distance = self.target.distance(&node.id);
			let pos = self.shortlist.partition_point(|e| e.distance < distance);
			self.shortlist.insert(pos, ShortlistEntry { node, distance, queried: false });
		}

		self.shortlist.truncate(NUM_FIND_NODE);
	}

	/// Up to `ALPHA - in_flight` unqueried candidates, closest first.
	pub fn next_round(&mut self) -> Vec<Identifier> {
		let budget = ALPHA.saturating_sub(self.in_flight.len());

		let ids: Vec<Identifier> = self
			.shortlist
			.iter_mut()
			.filter(|e| !e.queried)
			.take(budget)
			.map(|e| {
				e.queried = true;
				e.node.id
			})
			.collect();

		ids
	}

	pub fn node(&self, id: Identifier) -> Option<Node> {
		self.shortlist.iter().find(|e| e.node.id == id).map(|e| e.node)
	}

	/// Drops a node that timed out so it is never counted as a live candidate again.
	pub fn demote(&mut self, id: Identifier) {
		self.shortlist.retain(|e| e.node.id != id);
	}

	/// Cancels the timer for a probe reply or timeout, trying the responder's own id first and
	/// falling back to the bootstrap probe. Returns `None` if neither matches (unsolicited).
	pub fn take_timer(&mut self, responder: Identifier) -> Option<FixedTimerKey> {
		self.in_flight.remove(&ProbeKey::ById(responder)).or_else(|| self.in_flight.remove(&ProbeKey::Bootstrap))
	}

	pub fn is_exhausted(&self) -> bool {
		self.in_flight.is_empty() && self.shortlist.iter().all(|e| e.queried)
	}

	pub fn take_continuation(&mut self) -> Option<Continuation> {
		self.continuation.take()
	}

	pub fn finish(mut self, found: Option<Node>) {
		if let Some(continuation) = self.continuation.take() {
			let nodes = self.shortlist.drain(..).map(|e| e.node).collect();
			continuation.resolve(nodes, found);
		}
	}
}

/// Outstanding lookups, keyed by the nonce carried on their find-node/find-value datagrams.
#[derive(Default)]
pub struct QueryTable {
	queries: HashMap<u32, Query>,
}

impl QueryTable {
	pub fn new() -> Self {
		Self { queries: HashMap::new() }
	}

	/// Allocates a fresh nonzero nonce not already in use and inserts `build(nonce)` under it.
	pub fn insert(&mut self, rng: &mut impl Rng, build: impl FnOnce(u32) -> Query) -> u32 {
		loop {
			let nonce: u32 = rng.gen();

			if nonce != 0 && !self.queries.contains_key(&nonce) {
				self.queries.insert(nonce, build(nonce));
				return nonce;
			}
		}
	}

	pub fn get_mut(&mut self, nonce: u32) -> Option<&mut Query> {
		self.queries.get_mut(&nonce)
	}

	pub fn remove(&mut self, nonce: u32) -> Option<Query> {
		self.queries.remove(&nonce)
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

	fn new_query(target: Identifier) -> Query {
		new_query_with_self(target, id(255))
	}

	fn new_query_with_self(target: Identifier, self_id: Identifier) -> Query {
		Query { nonce: 1, target, self_id, domain: Domain::Inet, find_value: false, shortlist: Vec::new(), in_flight: HashMap::new(), continuation: None }
	}

	#[test]
	fn merge_keeps_sorted_order_and_caps_width() {
		let mut q = new_query(id(0));

		for i in 1..20u8 {
			q.merge(vec![node(i)]);
		}

		assert!(q.shortlist.len() <= NUM_FIND_NODE);
		assert!(q.shortlist.windows(2).all(|w| w[0].distance <= w[1].distance));
	}

	#[test]
	fn merge_ignores_duplicates_and_self() {
		let target = id(0);
		let mut q = new_query(target);

		q.merge(vec![node(5), node(5), node(5)]);
		assert_eq!(q.shortlist.len(), 1);

		q.merge(vec![Node::new(target, node(1).endpoint)]);
		assert_eq!(q.shortlist.len(), 1);
	}

	#[test]
	fn next_round_marks_queried_and_respects_alpha() {
		let mut q = new_query(id(0));

		for i in 1..10u8 {
			q.merge(vec![node(i)]);
		}

		let round = q.next_round();
		assert_eq!(round.len(), ALPHA);
		assert!(q.shortlist.iter().filter(|e| e.queried).count() == ALPHA);

		let round2 = q.next_round();
		assert_eq!(round2.len(), 0);
	}

	#[test]
	fn demote_removes_node_from_shortlist() {
		let mut q = new_query(id(0));
		q.merge(vec![node(3)]);
		q.demote(id(3));
		assert!(q.shortlist.is_empty());
	}

	#[test]
	fn take_timer_falls_back_to_bootstrap() {
		let mut q = new_query(id(0));
		assert!(q.take_timer(id(3)).is_none());
	}

	#[test]
	fn merge_excludes_self_even_when_target_differs() {
		// Looking up some other node's id, but a reply names us as one of its neighbors.
		let target = id(0);
		let self_id = id(7);
		let mut q = new_query_with_self(target, self_id);

		q.merge(vec![node(3), Node::new(self_id, node(7).endpoint)]);

		assert_eq!(q.shortlist.len(), 1);
		assert!(q.shortlist.iter().all(|e| e.node.id != self_id));
		assert!(q.next_round().iter().all(|id| *id != self_id));
	}
}
