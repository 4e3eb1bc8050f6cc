//! The versioned share file — the compatibility surface between the
//! engine and any guardian UI. JSON with hex-encoded public material and
//! the share scalar; master-level shares are never written (they exist
//! only inside the setup ceremony).

use std::collections::BTreeMap;

use cv_primitives::{Chain, PartyCount, PartyId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
	bip32::DerivationPath,
	crypto::{CryptoError, Point, Scalar},
	guardian::GuardianAccount,
	share::{KeyShare, ShareLevel},
};

pub const SHARE_FILE_VERSION: u32 = 1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShareFileError {
	#[error("not a share file: {0}")]
	Malformed(String),
	#[error("legacy share layout (single `share` field) is no longer supported; re-run setup")]
	LegacyLayout,
	#[error("unsupported share file version {0}")]
	UnsupportedVersion(u32),
	#[error("master level shares must not be persisted")]
	MasterLevelPersisted,
	#[error("field `{field}` is not valid: {source}")]
	InvalidField { field: &'static str, source: CryptoError },
	#[error("expected {expected} hex characters in `{field}`")]
	InvalidHexLength { field: &'static str, expected: usize },
}

/// Per-coin account entry: everything a guardian needs alongside its
/// account share to derive spending keys and verify what it signs for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareFileAccount {
	/// The account derivation path, e.g. `m/44'/0'/0'`.
	pub path: String,
	/// Hex, 32 bytes.
	pub chain_code: String,
	/// Hex, 33 bytes: the aggregate account public key.
	pub public_key: String,
	/// The account xpub as published to address issuers.
	pub xpub: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareFile {
	pub version: u32,
	pub party_id: PartyId,
	pub n_parties: PartyCount,
	pub level: ShareLevel,
	/// Hex, 32 bytes: this guardian's share scalar.
	pub value: String,
	pub accounts: BTreeMap<String, ShareFileAccount>,
}

impl ShareFile {
	pub fn new(share: &KeyShare) -> Result<Self, ShareFileError> {
		if share.level == ShareLevel::Master {
			return Err(ShareFileError::MasterLevelPersisted);
		}
		Ok(ShareFile {
			version: SHARE_FILE_VERSION,
			party_id: share.party_id,
			n_parties: share.n_parties,
			level: share.level,
			value: hex::encode(share.value.as_bytes()),
			accounts: BTreeMap::new(),
		})
	}

	pub fn with_account(
		mut self,
		chain: Chain,
		path: &DerivationPath,
		account: &GuardianAccount,
		xpub: &str,
	) -> Self {
		self.accounts.insert(
			chain_key(chain),
			ShareFileAccount {
				path: path.to_string(),
				chain_code: hex::encode(account.chain_code),
				public_key: hex::encode(account.public_key.as_bytes()),
				xpub: xpub.to_string(),
			},
		);
		self
	}

	pub fn to_json(&self) -> String {
		serde_json::to_string_pretty(self).expect("share file struct always serializes")
	}

	/// Parse and validate a share file. Legacy layouts and unknown
	/// versions are rejected with distinct errors so the UI can tell the
	/// user what to do.
	pub fn from_json(json: &str) -> Result<Self, ShareFileError> {
		let probe: VersionProbe = serde_json::from_str(json)
			.map_err(|e| ShareFileError::Malformed(e.to_string()))?;

		if probe.share.is_some() && probe.version.is_none() {
			return Err(ShareFileError::LegacyLayout);
		}
		match probe.version {
			None => return Err(ShareFileError::Malformed("missing `version` field".to_string())),
			Some(SHARE_FILE_VERSION) => {},
			Some(other) => return Err(ShareFileError::UnsupportedVersion(other)),
		}

		let file: ShareFile = serde_json::from_str(json)
			.map_err(|e| ShareFileError::Malformed(e.to_string()))?;

		if file.level == ShareLevel::Master {
			return Err(ShareFileError::MasterLevelPersisted);
		}
		// Validate the embedded material eagerly so corruption surfaces
		// here and not at signing time.
		file.share_value()?;
		for account in file.accounts.values() {
			account.chain_code()?;
			account.public_key()?;
		}
		Ok(file)
	}

	pub fn share_value(&self) -> Result<Scalar, ShareFileError> {
		let bytes = decode_hex_array::<32>("value", &self.value)?;
		Scalar::from_bytes(&bytes)
			.map_err(|source| ShareFileError::InvalidField { field: "value", source })
	}

	pub fn key_share(&self) -> Result<KeyShare, ShareFileError> {
		Ok(KeyShare {
			party_id: self.party_id,
			n_parties: self.n_parties,
			level: self.level,
			value: self.share_value()?,
		})
	}

	/// Rebuild the in-memory signing material for one coin.
	pub fn guardian_account(&self, chain: Chain) -> Result<Option<GuardianAccount>, ShareFileError> {
		let Some(account) = self.accounts.get(&chain_key(chain)) else {
			return Ok(None);
		};
		Ok(Some(GuardianAccount {
			share: self.key_share()?,
			chain_code: account.chain_code()?,
			public_key: account.public_key()?,
		}))
	}
}

impl ShareFileAccount {
	pub fn chain_code(&self) -> Result<[u8; 32], ShareFileError> {
		decode_hex_array::<32>("chain_code", &self.chain_code)
	}

	pub fn public_key(&self) -> Result<Point, ShareFileError> {
		let bytes = decode_hex_array::<33>("public_key", &self.public_key)?;
		Point::from_bytes(&bytes)
			.map_err(|source| ShareFileError::InvalidField { field: "public_key", source })
	}
}

fn chain_key(chain: Chain) -> String {
	chain.to_string().to_lowercase()
}

fn decode_hex_array<const N: usize>(
	field: &'static str,
	value: &str,
) -> Result<[u8; N], ShareFileError> {
	hex::decode(value)
		.ok()
		.and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
		.ok_or(ShareFileError::InvalidHexLength { field, expected: N * 2 })
}

/// First-pass parse used to distinguish "old format" from "garbage".
#[derive(Deserialize)]
struct VersionProbe {
	version: Option<u32>,
	share: Option<serde_json::Value>,
}
