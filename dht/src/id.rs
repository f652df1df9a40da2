use std::cmp::Ordering;
use std::fmt;

use utils::bytes::Cast;

/// Width of the identifier space, in bytes.
pub const ID_LEN: usize = 20;

/// A 160-bit node identifier, compared as an unsigned big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Cast)]
#[repr(C)]
pub struct Identifier([u8; ID_LEN]);

impl Identifier {
	/// The all-zeros sentinel. Never names a real node; used only as the probe key for a
	/// bootstrap find-node whose responder's identifier is not yet known.
	pub const ZERO: Identifier = Identifier([0; ID_LEN]);

	pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8; ID_LEN] {
		&self.0
	}

	pub fn is_zero(&self) -> bool {
		*self == Self::ZERO
	}

	/// XOR distance to another identifier, compared lexicographically as an unsigned integer.
	pub fn distance(&self, other: &Self) -> Distance {
		let mut out = [0u8; ID_LEN];

		for i in 0..ID_LEN {
			out[i] = self.0[i] ^ other.0[i];
		}

		Distance(out)
	}

	pub fn random(rng: &mut impl rand::Rng) -> Self {
		let mut bytes = [0u8; ID_LEN];
		rng.fill(&mut bytes);
		Self(bytes)
	}
}

impl fmt::Debug for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0 {
			write!(f, "{b:02x}")?;
		}
		Ok(())
	}
}

/// The XOR distance between two identifiers. Ordered as an unsigned big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Distance([u8; ID_LEN]);

impl PartialOrd for Distance {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Distance {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.cmp(&other.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(last: u8) -> Identifier {
		let mut bytes = [0u8; ID_LEN];
		bytes[ID_LEN - 1] = last;
		Identifier(bytes)
	}

	#[test]
	fn distance_to_self_is_zero() {
		let a = id(7);
		assert!(a.distance(&a).0.iter().all(|&b| b == 0));
	}

	#[test]
	fn distance_is_symmetric() {
		let a = id(7);
		let b = id(200);
		assert!(a.distance(&b) == b.distance(&a));
	}

	#[test]
	fn triangle_inequality_holds() {
		let a = id(1);
		let b = id(50);
		let c = id(130);

		let d_ab = a.distance(&b);
		let d_ac = a.distance(&c);
		let d_cb = c.distance(&b);

		// d(a,b) <= d(a,c) XOR d(c,b), compared as unsigned integers.
		let mut xor = [0u8; ID_LEN];
		for i in 0..ID_LEN {
			xor[i] = d_ac.0[i] ^ d_cb.0[i];
		}

		assert!(d_ab <= Distance(xor));
	}

	#[test]
	fn zero_is_zero() {
		assert!(Identifier::ZERO.is_zero());
		assert!(!id(1).is_zero());
	}
}
