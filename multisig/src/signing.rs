//! The four-round threshold ECDSA protocol.
//!
//! Round 1 and round 3 run on each guardian; rounds 2 and 4 are the
//! coordinator's combination steps. The model is honest-but-curious: each
//! guardian forwards its nonce `k_i` alongside `R_i = k_i · G` so the
//! coordinator can form `k = Σ k_i`. A party that sends an `R_i`
//! inconsistent with its `k_i` invalidates the signature (caught by the
//! final verification) but learns nothing about any share from one run.

use std::collections::BTreeMap;

use cv_primitives::{PartyCount, PartyId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::{Point, Rng, Scalar};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningError {
	#[error("combined nonce is degenerate (restart with fresh nonces)")]
	DegenerateNonce,
	#[error("combined signature failed verification against the vault key")]
	SignatureInvalid,
	#[error("no recovery id reproduces the public key")]
	VNotRecoverable,
	#[error("party count must be non-zero")]
	InvalidPartyCount,
}

/// A guardian's round-1 output. `k` stays with the guardian in a
/// malicious-secure protocol; here it travels to the coordinator by
/// design (see the module docs).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Round1Share {
	pub big_r: Point,
	pub k: Scalar,
}

/// What the coordinator broadcasts to every guardian after combining
/// round 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Round2Broadcast {
	pub big_r: Point,
	/// `R.x mod n`, the signature's first component.
	pub r: Scalar,
	pub k_total: Scalar,
}

/// A low-S normalized ECDSA signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSignature {
	pub r: Scalar,
	pub s: Scalar,
}

/// Round 1 (per guardian): sample a fresh uniform nonce. A nonce must
/// never be reused across sessions; reuse across two distinct messages
/// lets anyone holding both transcripts solve for the share.
pub fn round1_generate(rng: &mut Rng) -> Round1Share {
	let k = Scalar::random(rng);
	Round1Share { big_r: Point::from_scalar(&k), k }
}

/// Round 2 (coordinator): combine the guardians' nonce commitments.
/// Degenerate combinations abort the session; the nonces are spent
/// either way and a fresh session must restart from round 1.
pub fn combine_round1(
	submissions: &BTreeMap<PartyId, Round1Share>,
) -> Result<Round2Broadcast, SigningError> {
	let big_r: Point = submissions.values().map(|share| share.big_r).sum();
	if big_r.is_point_at_infinity() {
		return Err(SigningError::DegenerateNonce);
	}

	let r = Scalar::from_bytes_mod_order(&big_r.x_bytes());
	if r.is_zero() {
		return Err(SigningError::DegenerateNonce);
	}

	let k_total: Scalar = submissions.values().map(|share| &share.k).sum();
	if k_total.is_zero() {
		return Err(SigningError::DegenerateNonce);
	}

	Ok(Round2Broadcast { big_r, r, k_total })
}

/// Round 3 (per guardian): the partial signature
/// `s_i = k⁻¹ · (z / n_parties + r · x_i) mod n`.
///
/// Summed over all guardians this telescopes to the textbook
/// `s = k⁻¹ · (z + r · x)`.
pub fn round3_sign(
	share_value: &Scalar,
	message_hash: &[u8; 32],
	broadcast: &Round2Broadcast,
	n_parties: PartyCount,
) -> Result<Scalar, SigningError> {
	let k_inv = broadcast.k_total.invert().ok_or(SigningError::DegenerateNonce)?;
	let n_inv = Scalar::from(n_parties as u32)
		.invert()
		.ok_or(SigningError::InvalidPartyCount)?;

	let z = Scalar::from_bytes_mod_order(message_hash);

	let mut weighted_share = &broadcast.r * share_value;
	let s_i = &k_inv * &(z * n_inv + &weighted_share);
	weighted_share.zeroize();
	Ok(s_i)
}

/// Round 4 (coordinator): combine the partial signatures, normalize to
/// low-S and verify against the vault's public key. Verification failure
/// is terminal for the session; there is nothing to retry.
pub fn combine_round3(
	r: &Scalar,
	submissions: &BTreeMap<PartyId, Scalar>,
	message_hash: &[u8; 32],
	public_key: &Point,
) -> Result<ThresholdSignature, SigningError> {
	let s: Scalar = submissions.values().sum();
	if s.is_zero() {
		return Err(SigningError::SignatureInvalid);
	}

	// BIP-62 low-S normalization: (r, s) and (r, n - s) are both valid,
	// Bitcoin relays only the low form.
	let s = if s.is_high() { s.negate() } else { s };

	let signature = ThresholdSignature { r: r.clone(), s };
	verify_signature(&signature, message_hash, public_key)?;
	Ok(signature)
}

/// Standard ECDSA verification through libsecp.
pub fn verify_signature(
	signature: &ThresholdSignature,
	message_hash: &[u8; 32],
	public_key: &Point,
) -> Result<(), SigningError> {
	let message = secp256k1::Message::from_digest_slice(message_hash)
		.map_err(|_| SigningError::SignatureInvalid)?;
	let signature = secp256k1::ecdsa::Signature::from_compact(&signature.to_compact())
		.map_err(|_| SigningError::SignatureInvalid)?;

	secp256k1::SECP256K1
		.verify_ecdsa(&message, &signature, &public_key.get_element())
		.map_err(|_| SigningError::SignatureInvalid)
}

/// Recover the y-parity bit `v ∈ {0, 1}` of the nonce point: lift `r`
/// with each parity and pick the candidate for which
/// `Q = r⁻¹ · (s · R_cand − z · G)` reproduces the public key.
/// Deterministic by construction — a miss means an earlier protocol
/// error, which is fatal to the session.
pub fn recover_v(
	signature: &ThresholdSignature,
	message_hash: &[u8; 32],
	public_key: &Point,
) -> Result<u8, SigningError> {
	let r_inv = signature.r.invert().ok_or(SigningError::VNotRecoverable)?;
	let z = Scalar::from_bytes_mod_order(message_hash);
	let z_point = Point::from_scalar(&z);

	// Nonce points whose x coordinate exceeded the group order (and was
	// reduced into `r`) would need recovery ids 2 and 3; the chance is
	// ~2^-128 and such sessions fail rather than broadcast a bad `v`.
	for v in 0..=1u8 {
		let Ok(candidate) = Point::lift_x(signature.r.as_bytes(), v == 1) else {
			continue;
		};
		if (candidate * &signature.s - z_point) * &r_inv == *public_key {
			return Ok(v);
		}
	}
	Err(SigningError::VNotRecoverable)
}

impl ThresholdSignature {
	/// 64-byte `r ‖ s` encoding.
	pub fn to_compact(&self) -> [u8; 64] {
		let mut out = [0u8; 64];
		out[..32].copy_from_slice(self.r.as_bytes());
		out[32..].copy_from_slice(self.s.as_bytes());
		out
	}

	/// 65-byte Ethereum wire encoding with the recovery byte appended.
	pub fn to_compact_with_v(&self, v: u8) -> [u8; 65] {
		let mut out = [0u8; 65];
		out[..64].copy_from_slice(&self.to_compact());
		out[64] = v;
		out
	}

	/// ASN.1 DER encoding: a SEQUENCE of two minimally encoded INTEGERs.
	pub fn to_der(&self) -> Vec<u8> {
		let r = der_integer(self.r.as_bytes());
		let s = der_integer(self.s.as_bytes());
		let mut out = Vec::with_capacity(r.len() + s.len() + 2);
		out.push(0x30);
		out.push((r.len() + s.len()) as u8);
		out.extend_from_slice(&r);
		out.extend_from_slice(&s);
		out
	}

	/// DER with the trailing sighash byte, as placed in Bitcoin scripts
	/// and witnesses.
	pub fn to_der_with_sighash(&self, sighash_type: u8) -> Vec<u8> {
		let mut out = self.to_der();
		out.push(sighash_type);
		out
	}
}

/// Minimal DER INTEGER: leading zeros stripped, a zero byte re-added
/// only when the high bit would flip the sign.
fn der_integer(bytes: &[u8; 32]) -> Vec<u8> {
	let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(31);
	let trimmed = &bytes[first_nonzero..];

	let mut out = Vec::with_capacity(trimmed.len() + 3);
	out.push(0x02);
	if trimmed[0] & 0x80 != 0 {
		out.push((trimmed.len() + 1) as u8);
		out.push(0x00);
	} else {
		out.push(trimmed.len() as u8);
	}
	out.extend_from_slice(trimmed);
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::share::{generate_master_shares, KeyShare};
	use rand::SeedableRng;

	/// Run the full four-round ceremony in-process.
	pub fn run_ceremony(
		rng: &mut Rng,
		shares: &[KeyShare],
		message_hash: &[u8; 32],
		public_key: &Point,
	) -> Result<ThresholdSignature, SigningError> {
		let n_parties = shares.len() as PartyCount;

		let round1: BTreeMap<PartyId, Round1Share> = shares
			.iter()
			.map(|share| (share.party_id, round1_generate(rng)))
			.collect();
		let broadcast = combine_round1(&round1)?;

		let round3: BTreeMap<PartyId, Scalar> = shares
			.iter()
			.map(|share| {
				round3_sign(&share.value, message_hash, &broadcast, n_parties)
					.map(|s_i| (share.party_id, s_i))
			})
			.collect::<Result<_, _>>()?;

		combine_round3(&broadcast.r, &round3, message_hash, public_key)
	}

	#[test]
	fn ceremony_produces_verifying_low_s_signatures() {
		let mut rng = Rng::from_seed([40; 32]);

		for n_parties in [1u8, 2, 3, 5] {
			let (shares, public_key) = generate_master_shares(&mut rng, n_parties).unwrap();
			let message_hash = [n_parties; 32];

			let signature = run_ceremony(&mut rng, &shares, &message_hash, &public_key).unwrap();
			assert!(!signature.s.is_high());
			verify_signature(&signature, &message_hash, &public_key).unwrap();
		}
	}

	#[test]
	fn signature_survives_libsecp_der_parsing() {
		let mut rng = Rng::from_seed([41; 32]);
		let (shares, public_key) = generate_master_shares(&mut rng, 3).unwrap();
		let message_hash = [0x5a; 32];

		let signature = run_ceremony(&mut rng, &shares, &message_hash, &public_key).unwrap();

		// libsecp's own DER parser is the oracle for our encoder
		let parsed = secp256k1::ecdsa::Signature::from_der(&signature.to_der()).unwrap();
		assert_eq!(
			parsed.serialize_compact().to_vec(),
			signature.to_compact().to_vec()
		);

		let with_sighash = signature.to_der_with_sighash(0x01);
		assert_eq!(with_sighash.last(), Some(&0x01));
		assert_eq!(&with_sighash[..with_sighash.len() - 1], signature.to_der().as_slice());
	}

	#[test]
	fn der_integer_edge_cases() {
		// High bit set: a padding zero is required
		let mut high = [0u8; 32];
		high[0] = 0x80;
		assert_eq!(der_integer(&high)[..3], [0x02, 0x21, 0x00]);

		// Small value: leading zeros are stripped
		let mut small = [0u8; 32];
		small[31] = 0x7f;
		assert_eq!(der_integer(&small), vec![0x02, 0x01, 0x7f]);
	}

	#[test]
	fn recovered_v_matches_libsecp_recovery() {
		let mut rng = Rng::from_seed([42; 32]);
		let (shares, public_key) = generate_master_shares(&mut rng, 3).unwrap();

		for message_hash in [[0x01; 32], [0x77; 32], [0xfe; 32]] {
			let signature = run_ceremony(&mut rng, &shares, &message_hash, &public_key).unwrap();
			let v = recover_v(&signature, &message_hash, &public_key).unwrap();

			// Exactly one parity must recover
			assert_eq!(
				(0..=1u8)
					.filter(|candidate| {
						let lifted =
							Point::lift_x(signature.r.as_bytes(), *candidate == 1).unwrap();
						let r_inv = signature.r.invert().unwrap();
						let z = Scalar::from_bytes_mod_order(&message_hash);
						(lifted * &signature.s - Point::from_scalar(&z)) * &r_inv == public_key
					})
					.count(),
				1
			);

			// And libsecp's recovery agrees with ours
			let recoverable = secp256k1::ecdsa::RecoverableSignature::from_compact(
				&signature.to_compact(),
				secp256k1::ecdsa::RecoveryId::from_i32(v as i32).unwrap(),
			)
			.unwrap();
			let message = secp256k1::Message::from_digest_slice(&message_hash).unwrap();
			let recovered =
				secp256k1::SECP256K1.recover_ecdsa(&message, &recoverable).unwrap();
			assert_eq!(recovered, public_key.get_element());
		}
	}

	#[test]
	fn degenerate_nonce_combinations_are_rejected() {
		let mut rng = Rng::from_seed([43; 32]);

		// Two honest parties plus one whose commitment cancels the sum
		let first = round1_generate(&mut rng);
		let second = round1_generate(&mut rng);
		let cancelling = Round1Share {
			big_r: Point::point_at_infinity() - (first.big_r + second.big_r),
			k: (&Scalar::zero() - &(&first.k + &second.k)),
		};

		let submissions: BTreeMap<PartyId, Round1Share> =
			[(1, first), (2, second), (3, cancelling)].into_iter().collect();
		assert_eq!(combine_round1(&submissions), Err(SigningError::DegenerateNonce));
	}

	#[test]
	fn inconsistent_commitment_fails_final_verification() {
		let mut rng = Rng::from_seed([44; 32]);
		let (shares, public_key) = generate_master_shares(&mut rng, 2).unwrap();
		let message_hash = [0x33; 32];

		let mut round1: BTreeMap<PartyId, Round1Share> = shares
			.iter()
			.map(|share| (share.party_id, round1_generate(&mut rng)))
			.collect();
		// Party 2 lies about its commitment
		round1.get_mut(&2).unwrap().big_r = Point::from_scalar(&Scalar::from(99));

		let broadcast = combine_round1(&round1).unwrap();
		let round3: BTreeMap<PartyId, Scalar> = shares
			.iter()
			.map(|share| {
				(
					share.party_id,
					round3_sign(&share.value, &message_hash, &broadcast, 2).unwrap(),
				)
			})
			.collect();

		assert_eq!(
			combine_round3(&broadcast.r, &round3, &message_hash, &public_key),
			Err(SigningError::SignatureInvalid)
		);
	}

	#[test]
	fn nonce_reuse_across_messages_leaks_the_share() {
		// The negative property behind the nonce-freshness rule: a single
		// guardian reusing `k_i` across two sessions over distinct
		// messages hands out enough algebra to solve for its share.
		let mut rng = Rng::from_seed([45; 32]);
		let (shares, _) = generate_master_shares(&mut rng, 3).unwrap();
		let n_parties = 3u8;

		let reused_round1: BTreeMap<PartyId, Round1Share> = shares
			.iter()
			.map(|share| (share.party_id, round1_generate(&mut rng)))
			.collect();

		let z1 = [0x01; 32];
		let z2 = [0x02; 32];
		let broadcast = combine_round1(&reused_round1).unwrap();

		let target = &shares[0];
		let s1 = round3_sign(&target.value, &z1, &broadcast, n_parties).unwrap();
		let s2 = round3_sign(&target.value, &z2, &broadcast, n_parties).unwrap();

		// s1 - s2 = k⁻¹ · (z1 - z2) / n  =>  solve for x_i:
		// x_i = (s1 · k - z1 / n) / r
		let n_inv = Scalar::from(n_parties as u32).invert().unwrap();
		let z1_s = Scalar::from_bytes_mod_order(&z1);
		let z2_s = Scalar::from_bytes_mod_order(&z2);
		let k = (&(&z1_s - &z2_s) * &n_inv) * (&s1 - &s2).invert().unwrap();
		let recovered = (&(&s1 * &k) - &(&z1_s * &n_inv)) *
			broadcast.r.invert().unwrap();

		assert_eq!(recovered, target.value);
	}
}
