//! Recursive length prefix encoding, exactly as consensus requires:
//! a single byte below 0x80 encodes itself, short strings/lists carry a
//! one-byte length prefix, long ones a minimal big-endian length of
//! length. The decoder rejects every non-canonical form so that
//! `decode(encode(x)) == x` and `encode(decode(b)) == b` both hold.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RlpError {
	#[error("input ended before the announced length")]
	Truncated,
	#[error("bytes remain after the top-level item")]
	TrailingBytes,
	#[error("non-canonical encoding")]
	NonCanonical,
	#[error("announced length does not fit in memory")]
	LengthOverflow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rlp {
	Bytes(Vec<u8>),
	List(Vec<Rlp>),
}

impl Rlp {
	pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
		Rlp::Bytes(data.into())
	}

	pub fn list(items: impl Into<Vec<Rlp>>) -> Self {
		Rlp::List(items.into())
	}

	/// Minimal big-endian integer encoding; zero is the empty string.
	pub fn uint(value: u128) -> Self {
		let bytes = value.to_be_bytes();
		let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
		Rlp::Bytes(bytes[first_nonzero..].to_vec())
	}

	/// Big-endian integer given as raw bytes (e.g. a 32-byte scalar);
	/// leading zeros are stripped to keep the encoding minimal.
	pub fn uint_be(bytes: &[u8]) -> Self {
		let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
		Rlp::Bytes(bytes[first_nonzero..].to_vec())
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::new();
		self.encode_into(&mut out);
		out
	}

	fn encode_into(&self, out: &mut Vec<u8>) {
		match self {
			Rlp::Bytes(data) => {
				if data.len() == 1 && data[0] < 0x80 {
					out.push(data[0]);
				} else {
					write_length(out, data.len(), 0x80);
					out.extend_from_slice(data);
				}
			},
			Rlp::List(items) => {
				let mut payload = Vec::new();
				for item in items {
					item.encode_into(&mut payload);
				}
				write_length(out, payload.len(), 0xc0);
				out.extend_from_slice(&payload);
			},
		}
	}

	/// Decode exactly one item spanning the whole input.
	pub fn decode(data: &[u8]) -> Result<Rlp, RlpError> {
		let (item, consumed) = decode_item(data)?;
		if consumed != data.len() {
			return Err(RlpError::TrailingBytes);
		}
		Ok(item)
	}
}

fn write_length(out: &mut Vec<u8>, len: usize, base: u8) {
	if len <= 55 {
		out.push(base + len as u8);
	} else {
		let len_bytes = (len as u64).to_be_bytes();
		let first_nonzero = len_bytes.iter().position(|b| *b != 0).expect("len > 55");
		let len_of_len = len_bytes.len() - first_nonzero;
		out.push(base + 55 + len_of_len as u8);
		out.extend_from_slice(&len_bytes[first_nonzero..]);
	}
}

fn decode_item(data: &[u8]) -> Result<(Rlp, usize), RlpError> {
	let &prefix = data.first().ok_or(RlpError::Truncated)?;
	match prefix {
		0x00..=0x7f => Ok((Rlp::Bytes(vec![prefix]), 1)),
		0x80..=0xb7 => {
			let len = (prefix - 0x80) as usize;
			let payload = data.get(1..1 + len).ok_or(RlpError::Truncated)?;
			// A lone byte below 0x80 must encode itself.
			if len == 1 && payload[0] < 0x80 {
				return Err(RlpError::NonCanonical);
			}
			Ok((Rlp::Bytes(payload.to_vec()), 1 + len))
		},
		0xb8..=0xbf => {
			let (len, header) = read_long_length(data, prefix - 0xb7)?;
			let payload = data.get(header..header + len).ok_or(RlpError::Truncated)?;
			Ok((Rlp::Bytes(payload.to_vec()), header + len))
		},
		0xc0..=0xf7 => {
			let len = (prefix - 0xc0) as usize;
			let payload = data.get(1..1 + len).ok_or(RlpError::Truncated)?;
			Ok((Rlp::List(decode_list_payload(payload)?), 1 + len))
		},
		0xf8..=0xff => {
			let (len, header) = read_long_length(data, prefix - 0xf7)?;
			let payload = data.get(header..header + len).ok_or(RlpError::Truncated)?;
			Ok((Rlp::List(decode_list_payload(payload)?), header + len))
		},
	}
}

/// Parse a long-form length: `len_of_len` big-endian bytes following the
/// prefix. Returns the payload length and the total header size.
fn read_long_length(data: &[u8], len_of_len: u8) -> Result<(usize, usize), RlpError> {
	let len_of_len = len_of_len as usize;
	let len_bytes = data.get(1..1 + len_of_len).ok_or(RlpError::Truncated)?;
	if len_bytes[0] == 0 {
		return Err(RlpError::NonCanonical);
	}
	let mut len: u64 = 0;
	for &b in len_bytes {
		len = len.checked_mul(256).ok_or(RlpError::LengthOverflow)? + b as u64;
	}
	// Long form is only canonical for payloads over 55 bytes.
	if len <= 55 {
		return Err(RlpError::NonCanonical);
	}
	let len = usize::try_from(len).map_err(|_| RlpError::LengthOverflow)?;
	Ok((len, 1 + len_of_len))
}

fn decode_list_payload(mut payload: &[u8]) -> Result<Vec<Rlp>, RlpError> {
	let mut items = Vec::new();
	while !payload.is_empty() {
		let (item, consumed) = decode_item(payload)?;
		items.push(item);
		payload = &payload[consumed..];
	}
	Ok(items)
}
