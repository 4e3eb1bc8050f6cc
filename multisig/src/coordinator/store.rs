//! The repository seam. Any storage collaborator (key-value store,
//! document database) implements [`SessionStore`]; the engine ships an
//! in-memory implementation for tests and embedding.
//!
//! Writes are compare-and-set on `(session_id, expected_round)`: a write
//! whose expectation no longer holds returns [`StoreError::Conflict`]
//! and the caller reloads and reapplies. No multi-session transactions
//! exist or are needed — sessions are independent units of work.

use std::{
	collections::{BTreeMap, HashMap},
	time::SystemTime,
};

use async_trait::async_trait;
use cv_primitives::{Chain, PartyCount, PartyId, SessionId, VaultId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::bip32::ExtendedPublicKey;

use super::session::{SessionRound, SigningSession};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
	#[error("concurrent modification of session {0}")]
	Conflict(SessionId),
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// A vault as the coordinator sees it: the guardian set and the
/// published account keys per coin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultInfo {
	pub vault_id: VaultId,
	pub guardians: Vec<PartyId>,
	pub accounts: BTreeMap<Chain, ExtendedPublicKey>,
}

impl VaultInfo {
	pub fn n_parties(&self) -> PartyCount {
		self.guardians.len() as PartyCount
	}
}

#[async_trait]
pub trait SessionStore: Send + Sync {
	async fn load_session(
		&self,
		session_id: SessionId,
	) -> Result<Option<SigningSession>, StoreError>;

	/// Atomic per-session write. `expected_round: None` inserts a new
	/// session (and fails if one exists); `Some(round)` updates only if
	/// the stored session is still in that round.
	async fn store_session_cas(
		&self,
		session: SigningSession,
		expected_round: Option<SessionRound>,
	) -> Result<(), StoreError>;

	async fn list_expired(&self, now: SystemTime) -> Result<Vec<SessionId>, StoreError>;

	async fn get_vault(&self, vault_id: VaultId) -> Result<Option<VaultInfo>, StoreError>;

	async fn list_guardians(&self, vault_id: VaultId) -> Result<Vec<PartyId>, StoreError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
	sessions: RwLock<HashMap<SessionId, SigningSession>>,
	vaults: RwLock<HashMap<VaultId, VaultInfo>>,
}

impl InMemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn insert_vault(&self, vault: VaultInfo) {
		self.vaults.write().await.insert(vault.vault_id, vault);
	}
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
	async fn load_session(
		&self,
		session_id: SessionId,
	) -> Result<Option<SigningSession>, StoreError> {
		Ok(self.sessions.read().await.get(&session_id).cloned())
	}

	async fn store_session_cas(
		&self,
		session: SigningSession,
		expected_round: Option<SessionRound>,
	) -> Result<(), StoreError> {
		let mut sessions = self.sessions.write().await;
		let session_id = session.session_id;
		match (sessions.get(&session_id), expected_round) {
			(None, None) => {
				sessions.insert(session_id, session);
				Ok(())
			},
			(Some(current), Some(expected)) if current.round == expected => {
				sessions.insert(session_id, session);
				Ok(())
			},
			_ => Err(StoreError::Conflict(session_id)),
		}
	}

	async fn list_expired(&self, now: SystemTime) -> Result<Vec<SessionId>, StoreError> {
		Ok(self
			.sessions
			.read()
			.await
			.values()
			.filter(|session| session.is_overdue(now))
			.map(|session| session.session_id)
			.collect())
	}

	async fn get_vault(&self, vault_id: VaultId) -> Result<Option<VaultInfo>, StoreError> {
		Ok(self.vaults.read().await.get(&vault_id).cloned())
	}

	async fn list_guardians(&self, vault_id: VaultId) -> Result<Vec<PartyId>, StoreError> {
		Ok(self
			.vaults
			.read()
			.await
			.get(&vault_id)
			.map(|vault| vault.guardians.clone())
			.unwrap_or_default())
	}
}
