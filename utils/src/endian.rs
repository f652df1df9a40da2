use crate::bytes::{Cast, Unaligned};

/// Byte-order wrapper types for fields carried over the wire.
///
/// Each wrapper stores its value pre-swapped into the named byte order, so a
/// `#[repr(C)]` struct built out of these fields can be cast directly onto
/// (or out of) a raw byte buffer without any further conversion step.
macro_rules! define_be {
	( $( $name:ident($int:ident) )* ) => {
		$(
			#[doc = concat!("A `", stringify!($int), "` stored on the wire in network (big-endian) byte order.")]
			#[derive(Clone, Copy, PartialEq, Eq, Default)]
			#[repr(packed)]
			#[allow(non_camel_case_types)]
			pub struct $name($int);

			impl $name {
				/// Retrieves a copy of the value in native byte order.
				#[inline(always)]
				pub fn get(self) -> $int {
					<$int>::from_be(self.0)
				}
			}

			impl From<$int> for $name {
				/// Converts a native byte order value to the wire representation.
				#[inline(always)]
				fn from(value: $int) -> Self {
					Self(value.to_be())
				}
			}

			unsafe impl Cast for $name {}
			unsafe impl Unaligned for $name {}
		)*
	};
}

define_be!( u16be(u16) u32be(u32) );

