//! Guardian-side entry points. Both are pure functions over the
//! guardian's account-level share: all persistent signing state lives in
//! the coordinator.

use cv_primitives::PartyCount;
use thiserror::Error;
use zeroize::Zeroize;

use crate::{
	bip32::{derive_child_share, Bip32Error, ChildNumber},
	crypto::{Point, Rng, Scalar},
	share::{KeyShare, ShareError, ShareLevel},
	signing::{round1_generate, round3_sign, Round1Share, Round2Broadcast, SigningError},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuardianError {
	#[error("spending paths below the account level must be non-hardened")]
	HardenedSpendingPath,
	#[error(transparent)]
	Share(#[from] ShareError),
	#[error(transparent)]
	Bip32(#[from] Bip32Error),
	#[error(transparent)]
	Signing(#[from] SigningError),
}

/// A guardian's persisted signing material for one coin: the account
/// share plus the public account data it derives spending keys under.
#[derive(Clone, Debug)]
pub struct GuardianAccount {
	pub share: KeyShare,
	pub chain_code: [u8; 32],
	/// Aggregate account public key (all guardians' share points summed).
	pub public_key: Point,
}

/// Round 1: sample this session's nonce share. Invoked exactly once per
/// session; a fresh session requires a fresh nonce.
pub fn round1(rng: &mut Rng) -> Round1Share {
	round1_generate(rng)
}

/// Round 3: derive the spending-path child share in memory and produce
/// the partial signature for it. The derived scalar never outlives the
/// call.
pub fn round3(
	account: &GuardianAccount,
	path: &[ChildNumber],
	message_hash: &[u8; 32],
	broadcast: &Round2Broadcast,
) -> Result<Scalar, GuardianError> {
	account.share.ensure_level(ShareLevel::Account)?;
	if path.iter().any(|child| child.is_hardened()) {
		return Err(GuardianError::HardenedSpendingPath);
	}

	let n_parties: PartyCount = account.share.n_parties;
	let mut derived = derive_child_share(
		&account.share.value,
		n_parties,
		&account.public_key,
		&account.chain_code,
		path,
	)?;

	let s_i = round3_sign(&derived.value, message_hash, broadcast, n_parties)?;
	derived.value.zeroize();
	Ok(s_i)
}
