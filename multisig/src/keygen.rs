//! One-time vault setup: splitting the master seed, deriving master-level
//! shares, agreeing on the vault chain code, and the collaborative hardened
//! descent to the account level.
//!
//! Only account-level shares leave this module for persistence. Deriving an
//! account share per-guardian from a master share *without* the shared
//! ceremony would use a different tweak per guardian and the share sum would
//! diverge from the published key, which is why the descent happens here,
//! once, with an invariant check after every step.

use std::collections::BTreeMap;

use cv_primitives::{Chain, PartyCount, PartyId};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
	bip32::{
		derivation_tweak, derive_child_share, key_fingerprint, Bip32Error, ChildNumber,
		ExtendedPublicKey, KeyNetwork,
	},
	crypto::{Point, Rng, Scalar},
	share::{KeyShare, ShareError, ShareLevel},
};

/// HMAC key for master key derivation, as in BIP-32.
const MASTER_SEED_KEY: &[u8] = b"Bitcoin seed";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeygenError {
	#[error("seed share produces an invalid master share (re-split the seed)")]
	InvalidSeedShare,
	#[error("chain code does not match the agreed commitment")]
	ChainCodeMismatch,
	#[error("share sum diverged from the derived public key")]
	ShareSumMismatch,
	#[error("no chain codes submitted")]
	NoChainCodes,
	#[error(transparent)]
	Share(#[from] ShareError),
	#[error(transparent)]
	Bip32(#[from] Bip32Error),
}

/// One guardian's additive share of the 256-bit master seed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SeedShare(pub [u8; 32]);

/// Additively split a 256-bit seed (mod 2^256) into one share per
/// guardian.
pub fn split_seed(
	rng: &mut Rng,
	seed: &[u8; 32],
	n_parties: PartyCount,
) -> Result<Vec<SeedShare>, KeygenError> {
	if n_parties == 0 {
		return Err(ShareError::NoParties.into());
	}

	use rand::RngCore;
	let mut shares: Vec<SeedShare> = (1..n_parties)
		.map(|_| {
			let mut share = [0u8; 32];
			rng.fill_bytes(&mut share);
			SeedShare(share)
		})
		.collect();

	// The balancing share: seed minus the sum of the others, mod 2^256.
	let modulus = BigUint::from(1u8) << 256;
	let sum = shares.iter().fold(BigUint::from(0u8), |acc, share| {
		(acc + BigUint::from_bytes_be(&share.0)) % &modulus
	});
	let last: BigUint = (BigUint::from_bytes_be(seed) + &modulus - sum) % &modulus;

	let mut last_bytes = [0u8; 32];
	let be = last.to_bytes_be();
	last_bytes[32 - be.len()..].copy_from_slice(&be);
	shares.push(SeedShare(last_bytes));

	Ok(shares)
}

/// Guardian-side master share derivation: `HMAC-SHA512("Bitcoin seed",
/// seed_share)` yields the share scalar `k_i` and this guardian's chain
/// code candidate. The master key of the vault is *defined* as the sum of
/// the `k_i`.
pub fn derive_master_share(seed_share: &SeedShare) -> Result<(Scalar, [u8; 32]), KeygenError> {
	let i = crate::bip32::hmac_sha512(MASTER_SEED_KEY, &seed_share.0);

	let share = Scalar::from_bytes(&i[..32].try_into().expect("hmac output is 64 bytes"))
		.map_err(|_| KeygenError::InvalidSeedShare)?;
	if share.is_zero() {
		return Err(KeygenError::InvalidSeedShare);
	}
	let chain_code: [u8; 32] = i[32..].try_into().expect("hmac output is 64 bytes");
	Ok((share, chain_code))
}

/// The vault chain code is the lowest-numbered guardian's candidate.
/// Returns the chain code together with its SHA-256 commitment, which the
/// coordinator broadcasts for every guardian to acknowledge.
pub fn select_vault_chain_code(
	candidates: &BTreeMap<PartyId, [u8; 32]>,
) -> Result<([u8; 32], [u8; 32]), KeygenError> {
	let (_, chain_code) = candidates.iter().next().ok_or(KeygenError::NoChainCodes)?;
	Ok((*chain_code, chain_code_commitment(chain_code)))
}

pub fn chain_code_commitment(chain_code: &[u8; 32]) -> [u8; 32] {
	Sha256::digest(chain_code).into()
}

/// Guardian-side acknowledgement of the broadcast chain code.
pub fn verify_chain_code_commitment(
	chain_code: &[u8; 32],
	commitment: &[u8; 32],
) -> Result<(), KeygenError> {
	if chain_code_commitment(chain_code) == *commitment {
		Ok(())
	} else {
		Err(KeygenError::ChainCodeMismatch)
	}
}

/// The persisted outcome of the account descent: one account-level share
/// per guardian plus the account xpub anyone can issue addresses from.
#[derive(Clone, Debug)]
pub struct AccountKey {
	pub shares: Vec<KeyShare>,
	pub xpub: ExtendedPublicKey,
}

/// Collaborative hardened descent `m / 44' / coin' / 0'`.
///
/// Every guardian applies the identical tweak sequence (computed from the
/// broadcast parent public key and chain code), and after each step the
/// aggregated share points must land exactly on the derived public key.
pub fn derive_account_shares(
	master_shares: &[KeyShare],
	master_chain_code: &[u8; 32],
	chain: Chain,
	network: KeyNetwork,
) -> Result<AccountKey, KeygenError> {
	let n_parties = master_shares.len() as PartyCount;
	for share in master_shares {
		share.ensure_level(ShareLevel::Master)?;
	}

	let mut values: Vec<Scalar> =
		master_shares.iter().map(|share| share.value.clone()).collect();
	let mut public_key: Point =
		values.iter().map(Point::from_scalar).sum();
	let mut chain_code = *master_chain_code;
	let mut parent_fingerprint = [0u8; 4];

	let path = [
		ChildNumber::Hardened(44),
		ChildNumber::Hardened(chain.coin_type()),
		ChildNumber::Hardened(0),
	];

	for child in path {
		let (tweak, child_chain_code) = derivation_tweak(&chain_code, &public_key, child)?;

		parent_fingerprint = key_fingerprint(&public_key);
		for value in values.iter_mut() {
			*value = derive_child_share(value, n_parties, &public_key, &chain_code, &[child])?
				.value;
		}
		public_key = public_key + Point::from_scalar(&tweak);
		chain_code = child_chain_code;

		// The whole point of the ceremony: verify the share sum tracked
		// the public derivation before anything is persisted.
		let aggregated: Point = values.iter().map(Point::from_scalar).sum();
		if aggregated != public_key {
			return Err(KeygenError::ShareSumMismatch);
		}
	}

	Ok(AccountKey {
		shares: values
			.into_iter()
			.enumerate()
			.map(|(i, value)| KeyShare {
				party_id: (i + 1) as PartyId,
				n_parties,
				level: ShareLevel::Account,
				value,
			})
			.collect(),
		xpub: ExtendedPublicKey {
			network,
			depth: 3,
			parent_fingerprint,
			child_number: ChildNumber::Hardened(0),
			chain_code,
			public_key,
		},
	})
}

/// Convenience driver for the full setup flow used by tests and tooling:
/// split a fresh seed, derive master shares, agree on the chain code and
/// descend to the account level for `chain`.
pub fn setup_vault(
	rng: &mut Rng,
	n_parties: PartyCount,
	chain: Chain,
	network: KeyNetwork,
) -> Result<AccountKey, KeygenError> {
	use rand::RngCore;
	let mut seed = [0u8; 32];
	rng.fill_bytes(&mut seed);

	let seed_shares = split_seed(rng, &seed, n_parties)?;
	seed.zeroize();

	let mut master_shares = Vec::with_capacity(n_parties as usize);
	let mut chain_code_candidates = BTreeMap::new();
	for (i, seed_share) in seed_shares.iter().enumerate() {
		let party_id = (i + 1) as PartyId;
		let (value, chain_code) = derive_master_share(seed_share)?;
		master_shares.push(KeyShare {
			party_id,
			n_parties,
			level: ShareLevel::Master,
			value,
		});
		chain_code_candidates.insert(party_id, chain_code);
	}

	let (vault_chain_code, commitment) = select_vault_chain_code(&chain_code_candidates)?;
	// Every guardian acknowledges the broadcast chain code against the
	// coordinator's commitment.
	verify_chain_code_commitment(&vault_chain_code, &commitment)?;

	derive_account_shares(&master_shares, &vault_chain_code, chain, network)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::share::verify_partial_pubkeys;
	use rand::SeedableRng;

	#[test]
	fn seed_shares_sum_to_the_seed() {
		let mut rng = Rng::from_seed([30; 32]);
		let seed = [0xab; 32];

		let shares = split_seed(&mut rng, &seed, 3).unwrap();
		assert_eq!(shares.len(), 3);

		let modulus = BigUint::from(1u8) << 256;
		let sum = shares.iter().fold(BigUint::from(0u8), |acc, share| {
			(acc + BigUint::from_bytes_be(&share.0)) % &modulus
		});
		assert_eq!(sum, BigUint::from_bytes_be(&seed));
	}

	#[test]
	fn master_shares_aggregate_to_a_fixed_public_key() {
		let mut rng = Rng::from_seed([31; 32]);
		let seed = [0x11; 32];
		let shares = split_seed(&mut rng, &seed, 3).unwrap();

		let scalars: Vec<_> =
			shares.iter().map(|s| derive_master_share(s).unwrap().0).collect();
		let master_public: Point = scalars.iter().map(Point::from_scalar).sum();

		// Deriving again from the same seed shares gives the same key
		let again: Point = shares
			.iter()
			.map(|s| Point::from_scalar(&derive_master_share(s).unwrap().0))
			.sum();
		assert_eq!(master_public, again);
		assert!(!master_public.is_point_at_infinity());
	}

	#[test]
	fn chain_code_agreement_detects_divergence() {
		let candidates: BTreeMap<PartyId, [u8; 32]> =
			[(1, [0xaa; 32]), (2, [0xbb; 32]), (3, [0xcc; 32])].into_iter().collect();

		let (chain_code, commitment) = select_vault_chain_code(&candidates).unwrap();
		// Party 1's candidate wins
		assert_eq!(chain_code, [0xaa; 32]);
		assert_eq!(verify_chain_code_commitment(&chain_code, &commitment), Ok(()));
		assert_eq!(
			verify_chain_code_commitment(&[0xbb; 32], &commitment),
			Err(KeygenError::ChainCodeMismatch)
		);
		assert_eq!(
			select_vault_chain_code(&BTreeMap::new()).unwrap_err(),
			KeygenError::NoChainCodes
		);
	}

	#[test]
	fn account_descent_preserves_the_share_invariant() {
		let mut rng = Rng::from_seed([32; 32]);
		let account =
			setup_vault(&mut rng, 3, Chain::Bitcoin, KeyNetwork::Mainnet).unwrap();

		assert_eq!(account.shares.len(), 3);
		assert!(account.shares.iter().all(|s| s.level == ShareLevel::Account));
		assert_eq!(account.xpub.depth, 3);
		assert_eq!(account.xpub.child_number, ChildNumber::Hardened(0));

		let partials: std::collections::BTreeMap<_, _> = account
			.shares
			.iter()
			.map(|share| (share.party_id, Point::from_scalar(&share.value)))
			.collect();
		verify_partial_pubkeys(&partials, &account.xpub.public_key).unwrap();
	}

	#[test]
	fn account_keys_differ_per_chain() {
		let mut rng = Rng::from_seed([33; 32]);
		let seed = [0x77; 32];
		let seed_shares = split_seed(&mut rng, &seed, 2).unwrap();

		let mut master_shares = Vec::new();
		let mut candidates = BTreeMap::new();
		for (i, seed_share) in seed_shares.iter().enumerate() {
			let (value, chain_code) = derive_master_share(seed_share).unwrap();
			master_shares.push(KeyShare {
				party_id: (i + 1) as PartyId,
				n_parties: 2,
				level: ShareLevel::Master,
				value,
			});
			candidates.insert((i + 1) as PartyId, chain_code);
		}
		let (chain_code, _) = select_vault_chain_code(&candidates).unwrap();

		let btc = derive_account_shares(
			&master_shares,
			&chain_code,
			Chain::Bitcoin,
			KeyNetwork::Mainnet,
		)
		.unwrap();
		let eth = derive_account_shares(
			&master_shares,
			&chain_code,
			Chain::Ethereum,
			KeyNetwork::Mainnet,
		)
		.unwrap();

		assert_ne!(btc.xpub.public_key, eth.xpub.public_key);
	}

	#[test]
	fn account_descent_requires_master_level_shares() {
		let mut rng = Rng::from_seed([34; 32]);
		let account =
			setup_vault(&mut rng, 2, Chain::Bitcoin, KeyNetwork::Mainnet).unwrap();

		// Feeding account-level shares back in is a level violation
		let result = derive_account_shares(
			&account.shares,
			&[0; 32],
			Chain::Bitcoin,
			KeyNetwork::Mainnet,
		);
		assert!(matches!(result, Err(KeygenError::Share(ShareError::LevelMismatch { .. }))));
	}
}
