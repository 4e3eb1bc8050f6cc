//! BIP-32 derivation over additive shares.
//!
//! Public (xpub) derivation below the account level is verbatim BIP-32, so
//! externally issued receive addresses match any standard wallet. Share
//! derivation applies the same tweak divided by the number of parties:
//! each guardian adds `I_L / n_parties` to its share so that the share sum
//! moves by exactly `I_L`. Hardened steps hash the *aggregated public key*
//! under the hardened index (no single party ever holds the private parent
//! key, so the textbook private-key HMAC input does not exist here).

use core::fmt;
use std::str::FromStr;

use cv_primitives::PartyCount;
use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::crypto::{Point, Scalar};

const HARDENED_OFFSET: u32 = 1 << 31;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Bip32Error {
	#[error("cannot derive a hardened child from public material alone")]
	HardenedFromPublic,
	#[error("derived tweak is not a valid scalar (resample the index)")]
	TweakOutOfRange,
	#[error("derived child key is degenerate (resample the index)")]
	DegenerateChildKey,
	#[error("maximum derivation depth exceeded")]
	MaxDepthExceeded,
	#[error("party count must be non-zero")]
	InvalidPartyCount,
	#[error("invalid extended key encoding: {0}")]
	InvalidEncoding(String),
	#[error("invalid derivation path segment: {0}")]
	InvalidPathSegment(String),
}

/// A single BIP-32 derivation step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildNumber {
	Normal(u32),
	Hardened(u32),
}

impl ChildNumber {
	pub fn from_bits(bits: u32) -> Self {
		if bits >= HARDENED_OFFSET {
			ChildNumber::Hardened(bits - HARDENED_OFFSET)
		} else {
			ChildNumber::Normal(bits)
		}
	}

	/// The raw ser32 value: the index with the high bit set for
	/// hardened children.
	pub fn to_bits(self) -> u32 {
		match self {
			ChildNumber::Normal(index) => index,
			ChildNumber::Hardened(index) => index | HARDENED_OFFSET,
		}
	}

	pub fn is_hardened(self) -> bool {
		matches!(self, ChildNumber::Hardened(_))
	}
}

impl fmt::Display for ChildNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChildNumber::Normal(index) => write!(f, "{index}"),
			ChildNumber::Hardened(index) => write!(f, "{index}'"),
		}
	}
}

/// A derivation path such as `m/44'/0'/0'` (absolute) or `0/7`
/// (relative to an account key).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationPath(pub Vec<ChildNumber>);

impl DerivationPath {
	pub fn as_slice(&self) -> &[ChildNumber] {
		&self.0
	}

	pub fn is_fully_public(&self) -> bool {
		self.0.iter().all(|child| !child.is_hardened())
	}
}

impl FromStr for DerivationPath {
	type Err = Bip32Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut children = Vec::new();
		for (i, segment) in s.split('/').enumerate() {
			if i == 0 && (segment == "m" || segment == "M") {
				continue;
			}
			let (index_str, hardened) =
				match segment.strip_suffix('\'').or_else(|| segment.strip_suffix('h')) {
					Some(stripped) => (stripped, true),
					None => (segment, false),
				};
			let index: u32 = index_str
				.parse()
				.map_err(|_| Bip32Error::InvalidPathSegment(segment.to_string()))?;
			if index >= HARDENED_OFFSET {
				return Err(Bip32Error::InvalidPathSegment(segment.to_string()));
			}
			children.push(if hardened {
				ChildNumber::Hardened(index)
			} else {
				ChildNumber::Normal(index)
			});
		}
		Ok(DerivationPath(children))
	}
}

impl fmt::Display for DerivationPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "m")?;
		for child in &self.0 {
			write!(f, "/{child}")?;
		}
		Ok(())
	}
}

/// Network an extended key is serialized for (selects the Base58Check
/// version bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyNetwork {
	Mainnet,
	Testnet,
}

impl KeyNetwork {
	const fn xpub_version(self) -> [u8; 4] {
		match self {
			KeyNetwork::Mainnet => [0x04, 0x88, 0xb2, 0x1e],
			KeyNetwork::Testnet => [0x04, 0x35, 0x87, 0xcf],
		}
	}
}

/// BIP-32 extended public key. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtendedPublicKey {
	pub network: KeyNetwork,
	pub depth: u8,
	pub parent_fingerprint: [u8; 4],
	pub child_number: ChildNumber,
	pub chain_code: [u8; 32],
	pub public_key: Point,
}

impl ExtendedPublicKey {
	pub fn new_master(network: KeyNetwork, public_key: Point, chain_code: [u8; 32]) -> Self {
		ExtendedPublicKey {
			network,
			depth: 0,
			parent_fingerprint: [0; 4],
			child_number: ChildNumber::Normal(0),
			chain_code,
			public_key,
		}
	}

	/// First four bytes of `hash160(serP(K))`, used to link children to
	/// this key.
	pub fn fingerprint(&self) -> [u8; 4] {
		key_fingerprint(&self.public_key)
	}

	/// Standard BIP-32 public child derivation. Hardened children cannot
	/// be derived from public material and are refused.
	pub fn derive_child(&self, child: ChildNumber) -> Result<Self, Bip32Error> {
		if child.is_hardened() {
			return Err(Bip32Error::HardenedFromPublic);
		}
		let depth = self.depth.checked_add(1).ok_or(Bip32Error::MaxDepthExceeded)?;
		let (tweak, chain_code) = derivation_tweak(&self.chain_code, &self.public_key, child)?;
		let public_key = self.public_key + Point::from_scalar(&tweak);
		if public_key.is_point_at_infinity() {
			return Err(Bip32Error::DegenerateChildKey);
		}
		Ok(ExtendedPublicKey {
			network: self.network,
			depth,
			parent_fingerprint: self.fingerprint(),
			child_number: child,
			chain_code,
			public_key,
		})
	}

	pub fn derive_path(&self, path: &[ChildNumber]) -> Result<Self, Bip32Error> {
		path.iter().try_fold(self.clone(), |xpub, child| xpub.derive_child(*child))
	}

	/// The 78-byte BIP-32 serialization.
	pub fn serialize(&self) -> [u8; 78] {
		let mut out = [0u8; 78];
		out[..4].copy_from_slice(&self.network.xpub_version());
		out[4] = self.depth;
		out[5..9].copy_from_slice(&self.parent_fingerprint);
		out[9..13].copy_from_slice(&self.child_number.to_bits().to_be_bytes());
		out[13..45].copy_from_slice(&self.chain_code);
		out[45..78].copy_from_slice(&self.public_key.as_bytes());
		out
	}
}

impl fmt::Display for ExtendedPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", bs58::encode(self.serialize()).with_check().into_string())
	}
}

impl FromStr for ExtendedPublicKey {
	type Err = Bip32Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = bs58::decode(s)
			.with_check(None)
			.into_vec()
			.map_err(|e| Bip32Error::InvalidEncoding(e.to_string()))?;
		if bytes.len() != 78 {
			return Err(Bip32Error::InvalidEncoding(format!(
				"expected 78 payload bytes, got {}",
				bytes.len()
			)));
		}

		let network = if bytes[..4] == KeyNetwork::Mainnet.xpub_version() {
			KeyNetwork::Mainnet
		} else if bytes[..4] == KeyNetwork::Testnet.xpub_version() {
			KeyNetwork::Testnet
		} else {
			return Err(Bip32Error::InvalidEncoding("unknown version bytes".to_string()));
		};

		let public_key =
			Point::from_bytes(bytes[45..78].try_into().expect("length checked above"))
				.map_err(|e| Bip32Error::InvalidEncoding(e.to_string()))?;
		if public_key.is_point_at_infinity() {
			return Err(Bip32Error::InvalidEncoding(
				"extended key cannot hold the identity".to_string(),
			));
		}

		Ok(ExtendedPublicKey {
			network,
			depth: bytes[4],
			parent_fingerprint: bytes[5..9].try_into().expect("length checked above"),
			child_number: ChildNumber::from_bits(u32::from_be_bytes(
				bytes[9..13].try_into().expect("length checked above"),
			)),
			chain_code: bytes[13..45].try_into().expect("length checked above"),
			public_key,
		})
	}
}

/// Compute the derivation tweak `(I_L, I_R)` for one step, from public
/// parent data only.
///
/// Non-hardened: `HMAC-SHA512(c, serP(K) ‖ ser32(i))`, verbatim BIP-32.
/// Hardened: `HMAC-SHA512(c, 0x00 ‖ serP(K) ‖ ser32(i))` — the pad byte
/// and the high index bit keep the input domain-separated from the
/// non-hardened case, and the aggregated public key stands in for the
/// private key that no party holds.
pub fn derivation_tweak(
	chain_code: &[u8; 32],
	parent_public_key: &Point,
	child: ChildNumber,
) -> Result<(Scalar, [u8; 32]), Bip32Error> {
	let mut data = Vec::with_capacity(38);
	if child.is_hardened() {
		data.push(0x00);
	}
	data.extend_from_slice(&parent_public_key.as_bytes());
	data.extend_from_slice(&child.to_bits().to_be_bytes());

	let i = hmac_sha512(chain_code, &data);

	let tweak = Scalar::from_bytes(&i[..32].try_into().expect("hmac output is 64 bytes"))
		.map_err(|_| Bip32Error::TweakOutOfRange)?;
	let chain_code: [u8; 32] = i[32..].try_into().expect("hmac output is 64 bytes");
	Ok((tweak, chain_code))
}

/// One guardian's view of a derived key: its updated share plus the
/// public data every participant agrees on.
#[derive(Clone, Debug)]
pub struct DerivedShare {
	pub value: Scalar,
	pub public_key: Point,
	pub chain_code: [u8; 32],
}

/// Walk `path` applying `x_i ← x_i + I_L / n_parties` at every step.
///
/// The division by `n_parties` is what makes the construction correct:
/// all `n_parties` guardians apply the same tweak, so the share *sum*
/// (the actual private key) moves by exactly `I_L`, matching the public
/// derivation above.
pub fn derive_child_share(
	share_value: &Scalar,
	n_parties: PartyCount,
	parent_public_key: &Point,
	parent_chain_code: &[u8; 32],
	path: &[ChildNumber],
) -> Result<DerivedShare, Bip32Error> {
	let per_party_divisor = Scalar::from(n_parties as u32)
		.invert()
		.ok_or(Bip32Error::InvalidPartyCount)?;

	let mut derived = DerivedShare {
		value: share_value.clone(),
		public_key: *parent_public_key,
		chain_code: *parent_chain_code,
	};

	for child in path {
		let (tweak, chain_code) =
			derivation_tweak(&derived.chain_code, &derived.public_key, *child)?;
		let public_key = derived.public_key + Point::from_scalar(&tweak);
		if public_key.is_point_at_infinity() {
			return Err(Bip32Error::DegenerateChildKey);
		}
		derived = DerivedShare {
			value: derived.value.clone() + &tweak * &per_party_divisor,
			public_key,
			chain_code,
		};
	}

	Ok(derived)
}

/// First four bytes of `hash160(serP(K))`.
pub(crate) fn key_fingerprint(public_key: &Point) -> [u8; 4] {
	let hash: [u8; 20] = Ripemd160::digest(Sha256::digest(public_key.as_bytes())).into();
	hash[..4].try_into().expect("hash160 output is 20 bytes")
}

pub(crate) fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
	let mut mac =
		Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts keys of any length");
	mac.update(data);
	mac.finalize().into_bytes().into()
}
