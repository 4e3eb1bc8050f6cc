//! Additive secret sharing. A vault's private key `x` exists only as the
//! sum of per-guardian shares `x_i`; the engine aggregates partial public
//! points `x_i · G` instead of ever combining the scalars themselves.

use std::collections::BTreeMap;

use cv_primitives::{PartyCount, PartyId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{Point, Rng, Scalar};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShareError {
	#[error("expected a {expected} level share, got {actual}")]
	LevelMismatch { expected: ShareLevel, actual: ShareLevel },
	#[error("party id {0} out of range")]
	PartyIdOutOfRange(PartyId),
	#[error("need at least one party")]
	NoParties,
	#[error("aggregated public key does not match the expected key")]
	PublicKeyMismatch,
}

/// The derivation level a share belongs to. Shares at different levels
/// must never be mixed: a master-level share combined with account-level
/// shares would silently produce garbage signatures.
#[derive(
	Clone,
	Copy,
	Debug,
	PartialEq,
	Eq,
	Serialize,
	Deserialize,
	strum_macros::Display,
	strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ShareLevel {
	Master,
	Account,
	Change,
	Address,
}

/// One guardian's additive share of a private scalar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
	#[zeroize(skip)]
	pub party_id: PartyId,
	#[zeroize(skip)]
	pub n_parties: PartyCount,
	#[zeroize(skip)]
	pub level: ShareLevel,
	pub value: Scalar,
}

impl KeyShare {
	pub fn ensure_level(&self, expected: ShareLevel) -> Result<(), ShareError> {
		if self.level == expected {
			Ok(())
		} else {
			Err(ShareError::LevelMismatch { expected, actual: self.level })
		}
	}
}

/// Split `secret` into `n_parties` additive shares. None of the shares is
/// zero and the shares sum to `secret` mod the group order.
pub fn split_secret(
	rng: &mut Rng,
	secret: &Scalar,
	n_parties: PartyCount,
) -> Result<Vec<Scalar>, ShareError> {
	if n_parties == 0 {
		return Err(ShareError::NoParties);
	}

	loop {
		let mut shares: Vec<Scalar> =
			(1..n_parties).map(|_| Scalar::random(rng)).collect();
		let partial_sum: Scalar = shares.iter().sum();
		let last = secret - &partial_sum;

		// `random()` never returns zero; only the balancing share can
		// be degenerate, in which case we resample the whole set.
		if !last.is_zero() {
			shares.push(last);
			return Ok(shares);
		}
	}
}

/// Generate a fresh master key as `n_parties` additive shares. The master
/// scalar never leaves this function; only its public key does.
pub fn generate_master_shares(
	rng: &mut Rng,
	n_parties: PartyCount,
) -> Result<(Vec<KeyShare>, Point), ShareError> {
	let mut master = Scalar::random(rng);
	let public_key = Point::from_scalar(&master);

	let shares = split_secret(rng, &master, n_parties)?;
	master.zeroize();

	Ok((
		shares
			.into_iter()
			.enumerate()
			.map(|(i, value)| KeyShare {
				party_id: (i + 1) as PartyId,
				n_parties,
				level: ShareLevel::Master,
				value,
			})
			.collect(),
		public_key,
	))
}

/// Sum of the guardians' partial public points `x_i · G`.
pub fn aggregate_public_key<I: IntoIterator<Item = Point>>(partials: I) -> Point {
	partials.into_iter().sum()
}

/// The collaborative consistency check: every guardian broadcasts
/// `x_i · G` and the sum must equal the stored vault key. This check
/// never reconstructs the private scalar.
pub fn verify_partial_pubkeys(
	partials: &BTreeMap<PartyId, Point>,
	expected: &Point,
) -> Result<(), ShareError> {
	if aggregate_public_key(partials.values().copied()) == *expected {
		Ok(())
	} else {
		Err(ShareError::PublicKeyMismatch)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	#[test]
	fn shares_sum_to_the_master_key() {
		let mut rng = Rng::from_seed([7; 32]);

		for n_parties in 1..=5 {
			let (shares, public_key) = generate_master_shares(&mut rng, n_parties).unwrap();
			assert_eq!(shares.len(), n_parties as usize);

			let partials: BTreeMap<_, _> = shares
				.iter()
				.map(|share| (share.party_id, Point::from_scalar(&share.value)))
				.collect();
			assert_eq!(verify_partial_pubkeys(&partials, &public_key), Ok(()));

			// Party ids are dense and 1-based
			assert_eq!(
				shares.iter().map(|s| s.party_id).collect::<Vec<_>>(),
				(1..=n_parties).collect::<Vec<_>>()
			);
			assert!(shares.iter().all(|s| !s.value.is_zero()));
		}
	}

	#[test]
	fn tampered_partial_fails_verification() {
		let mut rng = Rng::from_seed([8; 32]);
		let (shares, public_key) = generate_master_shares(&mut rng, 3).unwrap();

		let mut partials: BTreeMap<_, _> = shares
			.iter()
			.map(|share| (share.party_id, Point::from_scalar(&share.value)))
			.collect();
		partials.insert(2, Point::from_scalar(&Scalar::from(42)));

		assert_eq!(
			verify_partial_pubkeys(&partials, &public_key),
			Err(ShareError::PublicKeyMismatch)
		);
	}

	#[test]
	fn split_secret_rejects_zero_parties() {
		let mut rng = Rng::from_seed([9; 32]);
		assert_eq!(
			split_secret(&mut rng, &Scalar::from(5), 0),
			Err(ShareError::NoParties)
		);
	}

	#[test]
	fn level_check_names_both_levels() {
		let mut rng = Rng::from_seed([10; 32]);
		let (shares, _) = generate_master_shares(&mut rng, 2).unwrap();

		assert_eq!(
			shares[0].ensure_level(ShareLevel::Account),
			Err(ShareError::LevelMismatch {
				expected: ShareLevel::Account,
				actual: ShareLevel::Master
			})
		);
		assert_eq!(shares[0].ensure_level(ShareLevel::Master), Ok(()));
	}

	#[test]
	fn share_level_round_trips_through_strings() {
		use std::str::FromStr;
		assert_eq!(ShareLevel::Account.to_string(), "account");
		assert_eq!(ShareLevel::from_str("master").unwrap(), ShareLevel::Master);
		assert!(ShareLevel::from_str("seed").is_err());
	}
}
