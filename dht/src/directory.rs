//! The registered-nodes directory: receiver-side state built solely by inbound `register`
//! datagrams and consulted solely by the find-value handler. No eviction happens here; directory
//! growth is bounded externally by the peers oracle's own timeout policy.

use std::collections::HashMap;
use std::time::Instant;

use crate::id::Identifier;
use crate::node::Endpoint;

#[derive(Clone, Copy)]
pub struct Registration {
	pub endpoint: Endpoint,
	pub session: u32,
	pub last_seen: Instant,
}

#[derive(Default)]
pub struct Directory {
	entries: HashMap<Identifier, Registration>,
}

impl Directory {
	pub fn new() -> Self {
		Self { entries: HashMap::new() }
	}

	pub fn get(&self, id: Identifier) -> Option<Registration> {
		self.entries.get(&id).copied()
	}

	/// Applies an inbound register per the directory policy: a new id is inserted outright; a
	/// repeat of the same session refreshes endpoint and time; a different session claiming the
	/// same endpoint only refreshes time; a different session at a different endpoint is ignored
	/// so it cannot displace the legitimate holder of the id.
	pub fn register(&mut self, id: Identifier, endpoint: Endpoint, session: u32) {
		match self.entries.get_mut(&id) {
			None => {
				self.entries.insert(id, Registration { endpoint, session, last_seen: Instant::now() });
			}
			Some(prior) if prior.session == session => {
				prior.endpoint = endpoint;
				prior.last_seen = Instant::now();
			}
			Some(prior) if prior.endpoint == endpoint => {
				prior.last_seen = Instant::now();
			}
			Some(_) => {}
		}
	}
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

	fn endpoint(port: u16) -> Endpoint {
		Endpoint::Inet(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port))
	}

	#[test]
	fn first_register_is_inserted() {
		let mut dir = Directory::new();
		dir.register(id(1), endpoint(1000), 7);
		let reg = dir.get(id(1)).unwrap();
		assert_eq!(reg.session, 7);
		assert_eq!(reg.endpoint, endpoint(1000));
	}

	#[test]
	fn same_session_overwrites_endpoint() {
		let mut dir = Directory::new();
		dir.register(id(1), endpoint(1000), 7);
		dir.register(id(1), endpoint(2000), 7);
		assert_eq!(dir.get(id(1)).unwrap().endpoint, endpoint(2000));
	}

	#[test]
	fn different_session_same_endpoint_only_refreshes_time() {
		let mut dir = Directory::new();
		dir.register(id(1), endpoint(1000), 7);
		dir.register(id(1), endpoint(1000), 8);
		assert_eq!(dir.get(id(1)).unwrap().session, 7);
		assert_eq!(dir.get(id(1)).unwrap().endpoint, endpoint(1000));
	}

	#[test]
	fn different_session_different_endpoint_is_ignored() {
		let mut dir = Directory::new();
		dir.register(id(1), endpoint(1000), 7);
		dir.register(id(1), endpoint(2000), 8);
		let reg = dir.get(id(1)).unwrap();
		assert_eq!(reg.session, 7);
		assert_eq!(reg.endpoint, endpoint(1000));
	}

	#[test]
	fn unregistered_id_is_absent() {
		let dir = Directory::new();
		assert!(dir.get(id(99)).is_none());
	}
}
