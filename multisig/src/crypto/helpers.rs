use core::{fmt, marker::PhantomData};

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;

/// Fixed-width byte encoding shared by `Scalar` (32 bytes) and `Point`
/// (33 bytes): a tuple of bytes, so binary formats stay length-prefixed
/// exactly once and JSON gets a plain array.
pub fn serialize_fixed_bytes<S, const N: usize>(
	bytes: &[u8; N],
	serializer: S,
) -> Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	let mut tuple = serializer.serialize_tuple(N)?;
	for byte in bytes {
		tuple.serialize_element(byte)?;
	}
	tuple.end()
}

/// Deserializes a fixed-size byte array from a sequence of bytes
/// (the format [`serialize_fixed_bytes`] produces).
pub struct ArrayVisitor<A> {
	marker: PhantomData<A>,
}

impl<A> ArrayVisitor<A> {
	pub fn new() -> Self {
		ArrayVisitor { marker: PhantomData }
	}
}

impl<'de, const N: usize> Visitor<'de> for ArrayVisitor<[u8; N]> {
	type Value = [u8; N];

	fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "an array of {N} bytes")
	}

	fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> Result<Self::Value, S::Error> {
		let mut array = [0u8; N];
		for (i, byte) in array.iter_mut().enumerate() {
			*byte = seq
				.next_element()?
				.ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
		}
		Ok(array)
	}
}
