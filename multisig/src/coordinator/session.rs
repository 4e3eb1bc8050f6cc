//! The per-session state machine. Transitions are pure methods on
//! [`SigningSession`]; every illegal event returns a typed error and
//! leaves the session untouched, so the coordinator can persist the
//! struct if and only if a method succeeded.

use std::{
	collections::BTreeMap,
	time::{Duration, SystemTime},
};

use cv_primitives::{Chain, PartyCount, PartyId, SessionId, VaultId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
	bip32::ChildNumber,
	crypto::{Point, Scalar},
	signing::{
		combine_round1, combine_round3, recover_v, Round1Share, Round2Broadcast, SigningError,
		ThresholdSignature,
	},
};

use super::{CoordinatorError, SubmitStatus};

#[derive(
	Clone,
	Copy,
	Debug,
	PartialEq,
	Eq,
	Serialize,
	Deserialize,
	strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionRound {
	Created,
	Round1Collecting,
	Round2Ready,
	Round3Collecting,
	Round4Ready,
	Completed,
	Failed,
	Expired,
}

impl SessionRound {
	/// Terminal sessions are immutable; nothing revives them.
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionRound::Completed | SessionRound::Failed | SessionRound::Expired)
	}
}

/// Why a session ended in the `failed` state. Recorded once and
/// reported with the session id on every later access.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
	#[error("degenerate_r")]
	DegenerateR,
	#[error("signature_invalid")]
	SignatureInvalid,
	#[error("v_not_recoverable")]
	VNotRecoverable,
	#[error("cancelled (requested by party {party_id})")]
	Cancelled { party_id: PartyId },
}

/// The coordinator's ledger entry for one signing ceremony.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningSession {
	pub session_id: SessionId,
	pub vault_id: VaultId,
	pub chain: Chain,
	pub message_hash: [u8; 32],
	/// Fixed at creation, never mutated.
	pub required_parties: Vec<PartyId>,
	/// Account-relative non-hardened path the vault signs under.
	pub spending_path: Vec<ChildNumber>,
	/// The derived child public key the final signature must verify
	/// against.
	pub public_key: Point,
	pub round: SessionRound,
	pub round1_submissions: BTreeMap<PartyId, Round1Share>,
	pub round2: Option<Round2Broadcast>,
	pub round3_submissions: BTreeMap<PartyId, Scalar>,
	pub signature: Option<ThresholdSignature>,
	pub recovery_id: Option<u8>,
	pub failure: Option<FailureReason>,
	pub created_at: SystemTime,
	pub expires_at: SystemTime,
}

/// Read-only view for external callers; carries no nonce material.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
	pub session_id: SessionId,
	pub vault_id: VaultId,
	pub chain: Chain,
	pub message_hash: [u8; 32],
	pub required_parties: Vec<PartyId>,
	pub round: SessionRound,
	pub round1_submitted: Vec<PartyId>,
	pub round3_submitted: Vec<PartyId>,
	pub signature: Option<ThresholdSignature>,
	pub recovery_id: Option<u8>,
	pub failure: Option<FailureReason>,
	pub created_at: SystemTime,
	pub expires_at: SystemTime,
}

impl SigningSession {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		session_id: SessionId,
		vault_id: VaultId,
		chain: Chain,
		message_hash: [u8; 32],
		required_parties: Vec<PartyId>,
		spending_path: Vec<ChildNumber>,
		public_key: Point,
		created_at: SystemTime,
		ttl: Duration,
	) -> Self {
		SigningSession {
			session_id,
			vault_id,
			chain,
			message_hash,
			required_parties,
			spending_path,
			public_key,
			round: SessionRound::Created,
			round1_submissions: BTreeMap::new(),
			round2: None,
			round3_submissions: BTreeMap::new(),
			signature: None,
			recovery_id: None,
			failure: None,
			created_at,
			expires_at: created_at + ttl,
		}
	}

	pub fn n_parties(&self) -> PartyCount {
		self.required_parties.len() as PartyCount
	}

	/// Start collecting round-1 submissions.
	pub fn open(&mut self) {
		debug_assert_eq!(self.round, SessionRound::Created);
		self.round = SessionRound::Round1Collecting;
	}

	pub fn is_overdue(&self, now: SystemTime) -> bool {
		!self.round.is_terminal() && now >= self.expires_at
	}

	/// Submissions against terminal sessions answer with the terminal
	/// condition instead of mutating anything.
	fn ensure_active(&self) -> Result<(), CoordinatorError> {
		match self.round {
			SessionRound::Expired => Err(CoordinatorError::Expired),
			SessionRound::Failed => Err(CoordinatorError::SessionFailed(
				self.failure.expect("failed sessions always record a reason"),
			)),
			round if round.is_terminal() => Err(CoordinatorError::WrongRound { round }),
			_ => Ok(()),
		}
	}

	fn ensure_authorized(&self, party_id: PartyId) -> Result<(), CoordinatorError> {
		if self.required_parties.contains(&party_id) {
			Ok(())
		} else {
			Err(CoordinatorError::UnauthorizedParty(party_id))
		}
	}

	pub fn apply_round1(
		&mut self,
		party_id: PartyId,
		submission: Round1Share,
	) -> Result<SubmitStatus, CoordinatorError> {
		self.ensure_active()?;
		self.ensure_authorized(party_id)?;

		if let Some(existing) = self.round1_submissions.get(&party_id) {
			// Idempotent retransmit: a bitwise identical payload returns
			// the stored outcome, anything else is a replay conflict.
			return if *existing == submission {
				Ok(SubmitStatus::Duplicate)
			} else {
				Err(CoordinatorError::ReplayConflict)
			};
		}
		if self.round != SessionRound::Round1Collecting {
			return Err(CoordinatorError::WrongRound { round: self.round });
		}

		self.round1_submissions.insert(party_id, submission);
		Ok(SubmitStatus::Accepted)
	}

	pub fn round1_complete(&self) -> bool {
		self.required_parties
			.iter()
			.all(|party_id| self.round1_submissions.contains_key(party_id))
	}

	/// All round-1 submissions are in: combine them and open round 3.
	/// A degenerate combination is terminal — the `k_i` values have been
	/// observed, so the ceremony must restart with fresh nonces in a new
	/// session.
	pub fn complete_round1(&mut self) {
		debug_assert_eq!(self.round, SessionRound::Round1Collecting);
		debug_assert!(self.round1_complete());

		match combine_round1(&self.round1_submissions) {
			Ok(broadcast) => {
				self.round2 = Some(broadcast);
				self.round = SessionRound::Round2Ready;
				// The broadcast is available to poll immediately.
				self.round = SessionRound::Round3Collecting;
			},
			Err(_) => self.fail(FailureReason::DegenerateR),
		}
	}

	pub fn apply_round3(
		&mut self,
		party_id: PartyId,
		submission: Scalar,
	) -> Result<SubmitStatus, CoordinatorError> {
		self.ensure_active()?;
		self.ensure_authorized(party_id)?;

		if let Some(existing) = self.round3_submissions.get(&party_id) {
			return if *existing == submission {
				Ok(SubmitStatus::Duplicate)
			} else {
				Err(CoordinatorError::ReplayConflict)
			};
		}
		if self.round != SessionRound::Round3Collecting {
			return Err(CoordinatorError::WrongRound { round: self.round });
		}

		self.round3_submissions.insert(party_id, submission);
		Ok(SubmitStatus::Accepted)
	}

	pub fn round3_complete(&self) -> bool {
		self.required_parties
			.iter()
			.all(|party_id| self.round3_submissions.contains_key(party_id))
	}

	/// All round-3 submissions are in: combine, verify, and (for
	/// Ethereum) recover the parity byte.
	pub fn complete_round4(&mut self) {
		debug_assert_eq!(self.round, SessionRound::Round3Collecting);
		debug_assert!(self.round3_complete());

		self.round = SessionRound::Round4Ready;

		let broadcast = self.round2.as_ref().expect("round 3 cannot open without round 2");
		match combine_round3(
			&broadcast.r,
			&self.round3_submissions,
			&self.message_hash,
			&self.public_key,
		) {
			Ok(signature) => {
				if self.chain == Chain::Ethereum {
					match recover_v(&signature, &self.message_hash, &self.public_key) {
						Ok(v) => self.recovery_id = Some(v),
						Err(_) => {
							self.fail(FailureReason::VNotRecoverable);
							return;
						},
					}
				}
				self.signature = Some(signature);
				self.round = SessionRound::Completed;
			},
			Err(SigningError::SignatureInvalid) => self.fail(FailureReason::SignatureInvalid),
			Err(_) => self.fail(FailureReason::DegenerateR),
		}
	}

	/// Cancellation is only effective while submissions are being
	/// collected; once a round is combining (or the session is terminal)
	/// the request is refused.
	pub fn cancel(&mut self, party_id: PartyId) -> Result<(), CoordinatorError> {
		self.ensure_active()?;
		self.ensure_authorized(party_id)?;
		match self.round {
			SessionRound::Round1Collecting | SessionRound::Round3Collecting => {
				self.fail(FailureReason::Cancelled { party_id });
				Ok(())
			},
			round => Err(CoordinatorError::WrongRound { round }),
		}
	}

	pub fn fail(&mut self, reason: FailureReason) {
		debug_assert!(!self.round.is_terminal());
		self.failure = Some(reason);
		self.round = SessionRound::Failed;
	}

	pub fn expire(&mut self) {
		debug_assert!(!self.round.is_terminal());
		self.round = SessionRound::Expired;
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			session_id: self.session_id,
			vault_id: self.vault_id,
			chain: self.chain,
			message_hash: self.message_hash,
			required_parties: self.required_parties.clone(),
			round: self.round,
			round1_submitted: self.round1_submissions.keys().copied().collect(),
			round3_submitted: self.round3_submissions.keys().copied().collect(),
			signature: self.signature.clone(),
			recovery_id: self.recovery_id,
			failure: self.failure,
			created_at: self.created_at,
			expires_at: self.expires_at,
		}
	}
}
