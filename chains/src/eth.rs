pub mod rlp;
pub mod transaction;

pub use rlp::{Rlp, RlpError};
pub use transaction::{AccessListItem, Eip1559Transaction, LegacyTransaction};

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
	Keccak256::digest(data).into()
}

/// EIP-191 personal-message hash:
/// `keccak256("\x19Ethereum Signed Message:\n" ‖ len(message) ‖ message)`.
/// Wallet-style message signing runs through the same ceremony as
/// transactions, it just hashes differently.
pub fn hash_message(message: &[u8]) -> [u8; 32] {
	let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
	data.extend_from_slice(message);
	keccak256(&data)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressParseError {
	#[error("expected 40 hex characters")]
	InvalidLength,
	#[error("invalid hex: {0}")]
	InvalidHex(String),
}

/// An Ethereum account address. Displayed with the EIP-55 mixed-case
/// checksum.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
	/// Last 20 bytes of the Keccak-256 of the uncompressed public key
	/// (without the 0x04 prefix byte).
	pub fn from_pubkey(pubkey: &secp256k1::PublicKey) -> Self {
		let uncompressed = pubkey.serialize_uncompressed();
		let hash = keccak256(&uncompressed[1..]);
		Address(hash[12..].try_into().expect("slice is exactly 20 bytes"))
	}

	/// EIP-55: a hex character is uppercased when the corresponding
	/// nibble of `keccak256(lowercase_hex_address)` is >= 8.
	pub fn to_checksum_string(&self) -> String {
		let lower = hex::encode(self.0);
		let hash = keccak256(lower.as_bytes());
		let checksummed: String = lower
			.chars()
			.enumerate()
			.map(|(i, c)| {
				let nibble =
					if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
				if nibble >= 8 {
					c.to_ascii_uppercase()
				} else {
					c
				}
			})
			.collect();
		format!("0x{checksummed}")
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_checksum_string())
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Address({})", self.to_checksum_string())
	}
}

impl FromStr for Address {
	type Err = AddressParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let stripped = s.strip_prefix("0x").unwrap_or(s);
		if stripped.len() != 40 {
			return Err(AddressParseError::InvalidLength);
		}
		let bytes =
			hex::decode(stripped).map_err(|e| AddressParseError::InvalidHex(e.to_string()))?;
		Ok(Address(bytes.try_into().expect("length checked above")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keccak256_empty_input() {
		assert_eq!(
			hex::encode(keccak256(b"")),
			"c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
		);
	}

	#[test]
	fn personal_message_hash_includes_the_length_prefix() {
		assert_eq!(
			hash_message(b"hello world"),
			keccak256(b"\x19Ethereum Signed Message:\n11hello world")
		);

		// Distinct lengths domain-separate otherwise identical payloads
		assert_ne!(hash_message(b"hello"), hash_message(b"hello\0"));
	}

	#[test]
	fn address_from_pubkey() {
		// Secret key and address from an example in the "Mastering
		// Ethereum" book.
		let sk = secp256k1::SecretKey::from_str(
			"f8f8a2f43c8376ccb0871305060d7b27b0554d2cc72bccf41b2705608452f315",
		)
		.unwrap();
		let pk = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &sk);

		assert_eq!(
			Address::from_pubkey(&pk),
			"0x001d3f1ef827552ae1114027bd3ecf1f086ba0f9".parse().unwrap()
		);
	}

	#[test]
	fn eip55_checksum_casing() {
		let address: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
		assert_eq!(address.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

		// Parsing accepts either casing.
		let roundtrip: Address = address.to_string().parse().unwrap();
		assert_eq!(roundtrip, address);
	}

	#[test]
	fn rejects_malformed_addresses() {
		assert_eq!("0x1234".parse::<Address>(), Err(AddressParseError::InvalidLength));
		assert!(matches!(
			"0xzz5aaeb6053f3e94c9b9a09f33669435e7ef1bea".parse::<Address>(),
			Err(AddressParseError::InvalidHex(_))
		));
	}
}
