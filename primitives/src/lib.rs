//! Primitive types shared by the custody engine crates.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one guardian within a vault. Party ids are 1-based
/// and dense: a vault with `n` guardians uses ids `1..=n`.
pub type PartyId = u8;

/// Number of guardians holding shares of a vault key.
pub type PartyCount = u8;

/// Identifies a signing session at the coordinator.
pub type SessionId = u64;

/// Identifies a vault (one jointly held master key).
pub type VaultId = u64;

/// The L1 network a signature is destined for. Both chains sign
/// over secp256k1; the chain selects hashing and signature encoding.
#[derive(
	Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Chain {
	Bitcoin,
	Ethereum,
}

impl Chain {
	/// BIP-44 coin type used for the vault's account derivation path.
	pub const fn coin_type(self) -> u32 {
		match self {
			Chain::Bitcoin => 0,
			Chain::Ethereum => 60,
		}
	}
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Chain::Bitcoin => write!(f, "Bitcoin"),
			Chain::Ethereum => write!(f, "Ethereum"),
		}
	}
}
