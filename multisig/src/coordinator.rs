//! The always-on coordinator. Drives every signing session through its
//! four rounds, serializing transitions per session while letting
//! unrelated sessions progress fully in parallel.
//!
//! The coordinator is transport-agnostic: the operations here are the
//! boundary any HTTP/WebSocket collaborator calls into, and all durable
//! state lives behind the [`SessionStore`] seam.

pub mod session;
pub mod store;

pub use session::{FailureReason, SessionRound, SessionSnapshot, SigningSession};
pub use store::{InMemorySessionStore, SessionStore, StoreError, VaultInfo};

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
	time::{Duration, SystemTime},
};

use cv_primitives::{Chain, PartyId, SessionId, VaultId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utilities::format_iterator;

use crate::{
	bip32::{Bip32Error, ChildNumber},
	crypto::Scalar,
	signing::{Round1Share, Round2Broadcast, ThresholdSignature},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinatorError {
	#[error("unknown session {0}")]
	UnknownSession(SessionId),
	#[error("unknown vault {0}")]
	UnknownVault(VaultId),
	#[error("operation not valid in round {round}")]
	WrongRound { round: SessionRound },
	#[error("party {0} is not a participant of this session")]
	UnauthorizedParty(PartyId),
	#[error("conflicting resubmission for this party")]
	ReplayConflict,
	#[error("session expired")]
	Expired,
	#[error("session failed: {0}")]
	SessionFailed(FailureReason),
	#[error("invalid request: {0}")]
	InvalidRequest(&'static str),
	#[error("invalid derivation path: {0}")]
	Derivation(#[from] Bip32Error),
	#[error(transparent)]
	Storage(#[from] StoreError),
}

/// Coordinator tunables. `Default` is the production configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Session lifetime when the request does not specify one.
	pub default_ttl: Duration,
	/// How often the background sweeper looks for overdue sessions.
	pub sweep_interval: Duration,
	/// Bounded retries for compare-and-set storage conflicts.
	pub max_store_retries: u32,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			default_ttl: Duration::from_secs(600),
			sweep_interval: Duration::from_secs(30),
			max_store_retries: 5,
		}
	}
}

/// The session descriptor submitted by the transport collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningRequest {
	pub vault_id: VaultId,
	pub chain: Chain,
	/// Must be exactly the vault's guardian set (the scheme is strictly
	/// n-of-n).
	pub required_parties: Vec<PartyId>,
	pub message_hash: [u8; 32],
	/// Account-relative spending path, non-hardened only.
	pub spending_path: Vec<ChildNumber>,
	/// Overrides [`Config::default_ttl`] when set.
	pub ttl: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
	Accepted,
	/// Idempotent retransmit of an identical payload; nothing changed.
	Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
	pub status: SubmitStatus,
	pub round: SessionRound,
}

/// A completed ceremony's output: `(r, s)` plus the parity byte for
/// Ethereum sessions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinalSignature {
	pub signature: ThresholdSignature,
	pub recovery_id: Option<u8>,
}

pub struct Coordinator<S> {
	store: Arc<S>,
	config: Config,
	next_session_id: AtomicU64,
	// One async mutex per live session serializes its transitions; the
	// outer std mutex only guards the map itself and is never held
	// across an await point.
	session_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SessionStore + 'static> Coordinator<S> {
	pub fn new(store: Arc<S>, config: Config) -> Self {
		Coordinator {
			store,
			config,
			next_session_id: AtomicU64::new(1),
			session_locks: Mutex::new(HashMap::new()),
		}
	}

	pub async fn create_signing_session(
		&self,
		request: SigningRequest,
	) -> Result<SessionId, CoordinatorError> {
		if request.required_parties.is_empty() {
			return Err(CoordinatorError::InvalidRequest("required_parties must not be empty"));
		}
		if request.message_hash == [0; 32] {
			return Err(CoordinatorError::InvalidRequest("message hash must be non-zero"));
		}
		if request.spending_path.iter().any(|child| child.is_hardened()) {
			return Err(CoordinatorError::InvalidRequest(
				"spending paths below the account are non-hardened",
			));
		}

		let vault = self
			.store
			.get_vault(request.vault_id)
			.await?
			.ok_or(CoordinatorError::UnknownVault(request.vault_id))?;

		// Strictly n-of-n: the required set is exactly the guardian set.
		let mut requested = request.required_parties.clone();
		requested.sort_unstable();
		requested.dedup();
		let mut guardians = vault.guardians.clone();
		guardians.sort_unstable();
		if requested != guardians || requested.len() != request.required_parties.len() {
			return Err(CoordinatorError::InvalidRequest(
				"required_parties must be exactly the vault's guardian set",
			));
		}

		let account_xpub = vault
			.accounts
			.get(&request.chain)
			.ok_or(CoordinatorError::InvalidRequest("vault has no account for this chain"))?;
		let child = account_xpub.derive_path(&request.spending_path)?;

		let now = SystemTime::now();
		let ttl = request.ttl.unwrap_or(self.config.default_ttl);

		// Ids are handed out monotonically; a collision with a persisted
		// session from an earlier process simply advances the counter.
		for _ in 0..=self.config.max_store_retries {
			let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
			let mut session = SigningSession::new(
				session_id,
				request.vault_id,
				request.chain,
				request.message_hash,
				request.required_parties.clone(),
				request.spending_path.clone(),
				child.public_key,
				now,
				ttl,
			);
			session.open();

			match self.store.store_session_cas(session, None).await {
				Ok(()) => {
					info!(
						session_id,
						vault_id = request.vault_id,
						chain = %request.chain,
						parties = %format_iterator(&request.required_parties),
						"created signing session"
					);
					return Ok(session_id);
				},
				Err(StoreError::Conflict(_)) => continue,
				Err(e) => return Err(e.into()),
			}
		}
		Err(CoordinatorError::InvalidRequest("could not allocate a session id"))
	}

	pub async fn submit_round1(
		&self,
		session_id: SessionId,
		party_id: PartyId,
		submission: Round1Share,
	) -> Result<SubmitResponse, CoordinatorError> {
		if submission.big_r.is_point_at_infinity() {
			return Err(CoordinatorError::InvalidRequest(
				"nonce commitment must not be the identity",
			));
		}
		if submission.k.is_zero() {
			return Err(CoordinatorError::InvalidRequest("nonce must be non-zero"));
		}

		self.with_session(session_id, move |session| {
			let status = session.apply_round1(party_id, submission.clone())?;
			if status == SubmitStatus::Accepted && session.round1_complete() {
				session.complete_round1();
				match session.round {
					SessionRound::Failed => warn!(
						session_id,
						reason = %session.failure.expect("failed sessions record a reason"),
						"round 1 combination failed"
					),
					round => debug!(session_id, %round, "round 1 complete"),
				}
			}
			Ok(SubmitResponse { status, round: session.round })
		})
		.await
	}

	/// Available from the moment every round-1 submission has been
	/// combined.
	pub async fn poll_round2(
		&self,
		session_id: SessionId,
	) -> Result<Round2Broadcast, CoordinatorError> {
		let session = self.load_live(session_id).await?;
		session
			.round2
			.clone()
			.ok_or(CoordinatorError::WrongRound { round: session.round })
	}

	pub async fn submit_round3(
		&self,
		session_id: SessionId,
		party_id: PartyId,
		submission: Scalar,
	) -> Result<SubmitResponse, CoordinatorError> {
		self.with_session(session_id, move |session| {
			let status = session.apply_round3(party_id, submission.clone())?;
			if status == SubmitStatus::Accepted && session.round3_complete() {
				session.complete_round4();
				match session.round {
					SessionRound::Completed => {
						info!(session_id, "signing session completed")
					},
					_ => warn!(
						session_id,
						reason = %session.failure.expect("failed sessions record a reason"),
						"round 4 combination failed"
					),
				}
			}
			Ok(SubmitResponse { status, round: session.round })
		})
		.await
	}

	pub async fn get_final_signature(
		&self,
		session_id: SessionId,
	) -> Result<FinalSignature, CoordinatorError> {
		let session = self.load_live(session_id).await?;
		match session.round {
			SessionRound::Completed => Ok(FinalSignature {
				signature: session
					.signature
					.clone()
					.expect("completed sessions always carry a signature"),
				recovery_id: session.recovery_id,
			}),
			round => Err(CoordinatorError::WrongRound { round }),
		}
	}

	pub async fn get_session(
		&self,
		session_id: SessionId,
	) -> Result<SessionSnapshot, CoordinatorError> {
		let session = self
			.store
			.load_session(session_id)
			.await?
			.ok_or(CoordinatorError::UnknownSession(session_id))?;
		Ok(session.snapshot())
	}

	/// Cancellation is effective only while submissions are being
	/// collected (see [`SigningSession::cancel`]).
	pub async fn cancel_session(
		&self,
		session_id: SessionId,
		party_id: PartyId,
	) -> Result<(), CoordinatorError> {
		self.with_session(session_id, move |session| {
			session.cancel(party_id)?;
			warn!(session_id, party_id, "session cancelled");
			Ok(())
		})
		.await
	}

	/// Transition every overdue session to `expired`. Returns the ids
	/// that were expired by this sweep.
	pub async fn expire_overdue_sessions(
		&self,
		now: SystemTime,
	) -> Result<Vec<SessionId>, CoordinatorError> {
		let mut expired = Vec::new();
		for session_id in self.store.list_expired(now).await? {
			let outcome = self
				.with_session(session_id, move |session| {
					if session.is_overdue(now) {
						session.expire();
						Ok(true)
					} else {
						Ok(false)
					}
				})
				.await;
			match outcome {
				Ok(true) => {
					warn!(session_id, "session expired");
					expired.push(session_id);
				},
				// Lost a race with a concurrent transition (or lazy
				// expiry); either way the session is settled.
				Ok(false) | Err(CoordinatorError::Expired) => {},
				Err(e) => return Err(e),
			}
		}
		Ok(expired)
	}

	/// Background task sweeping overdue sessions at the configured
	/// interval.
	pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let coordinator = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(coordinator.config.sweep_interval);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				if let Err(e) =
					coordinator.expire_overdue_sessions(SystemTime::now()).await
				{
					warn!("expiry sweep failed: {e}");
				}
			}
		})
	}

	/// Load + transition + compare-and-set store, serialized per session.
	/// The closure's error leaves the stored session untouched. Overdue
	/// sessions are expired on access before the closure runs.
	async fn with_session<T>(
		&self,
		session_id: SessionId,
		mut f: impl FnMut(&mut SigningSession) -> Result<T, CoordinatorError>,
	) -> Result<T, CoordinatorError> {
		use tracing::Instrument;

		let span = tracing::debug_span!("session", session_id);
		async move {
			let lock = self.session_lock(session_id);
			let _guard = lock.lock().await;

			let mut attempt = 0;
			loop {
				let mut session = self
					.store
					.load_session(session_id)
					.await?
					.ok_or(CoordinatorError::UnknownSession(session_id))?;
				let expected_round = session.round;

				if session.is_overdue(SystemTime::now()) {
					session.expire();
					self.store.store_session_cas(session, Some(expected_round)).await?;
					return Err(CoordinatorError::Expired);
				}

				let result = f(&mut session)?;

				match self.store.store_session_cas(session, Some(expected_round)).await {
					Ok(()) => return Ok(result),
					Err(StoreError::Conflict(_))
						if attempt < self.config.max_store_retries =>
					{
						attempt += 1;
						debug!(attempt, "storage conflict, retrying");
					},
					Err(e) => return Err(e.into()),
				}
			}
		}
		.instrument(span)
		.await
	}

	async fn load_live(&self, session_id: SessionId) -> Result<SigningSession, CoordinatorError> {
		let session = self
			.store
			.load_session(session_id)
			.await?
			.ok_or(CoordinatorError::UnknownSession(session_id))?;
		match session.round {
			SessionRound::Expired => Err(CoordinatorError::Expired),
			SessionRound::Failed => Err(CoordinatorError::SessionFailed(
				session.failure.expect("failed sessions always record a reason"),
			)),
			_ if session.is_overdue(SystemTime::now()) => Err(CoordinatorError::Expired),
			_ => Ok(session),
		}
	}

	fn session_lock(&self, session_id: SessionId) -> Arc<tokio::sync::Mutex<()>> {
		self.session_locks
			.lock()
			.expect("session lock map is never poisoned")
			.entry(session_id)
			.or_default()
			.clone()
	}
}
