pub mod address;
pub mod transaction;

pub use address::{p2pkh_address, p2tr_address, p2wpkh_address, AddressError};
pub use transaction::{OutPoint, Transaction, TxError, TxIn, TxOut, SIGHASH_ALL};

use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bitcoin network flavour. Selects address version bytes and bech32 HRPs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
	Mainnet,
	Testnet,
	Regtest,
}

impl Network {
	pub const fn p2pkh_version(self) -> u8 {
		match self {
			Network::Mainnet => 0x00,
			Network::Testnet | Network::Regtest => 0x6f,
		}
	}

	pub const fn bech32_hrp(self) -> &'static str {
		match self {
			Network::Mainnet => "bc",
			Network::Testnet => "tb",
			Network::Regtest => "bcrt",
		}
	}
}

/// Double SHA-256, the hash used throughout Bitcoin's consensus encoding.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
	Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD160(SHA256(data)), the public key hash used by P2PKH and P2WPKH.
pub fn hash160(data: &[u8]) -> [u8; 20] {
	Ripemd160::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash160_of_generator_pubkey() {
		// Compressed public key for secret key 1, i.e. the generator point.
		// Its hash160 is the witness program used in the BIP-173 examples.
		let pubkey =
			hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
				.unwrap();
		assert_eq!(
			hex::encode(hash160(&pubkey)),
			"751e76e8199196d454941c45d1b3a323f1433bd6"
		);
	}

	#[test]
	fn sha256d_matches_single_sha_composition() {
		let single: [u8; 32] = sha2::Sha256::digest(b"custody").into();
		assert_eq!(sha256d(b"custody"), <[u8; 32]>::from(sha2::Sha256::digest(single)));
	}
}
