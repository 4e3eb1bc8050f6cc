//! Ethereum transaction signing payloads and final (signed) encodings.
//!
//! The signing hash handed to the protocol must match what the network
//! computes exactly, so both transaction forms build their payloads from
//! the canonical RLP encoder in this crate.

use serde::{Deserialize, Serialize};

use super::{keccak256, rlp::Rlp, Address};

/// EIP-2930 access list entry, included (normally empty) in EIP-1559
/// payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListItem {
	pub address: Address,
	pub storage_keys: Vec<[u8; 32]>,
}

impl AccessListItem {
	fn to_rlp(&self) -> Rlp {
		Rlp::list([
			Rlp::bytes(self.address.0),
			Rlp::list(
				self.storage_keys.iter().map(|key| Rlp::bytes(*key)).collect::<Vec<_>>(),
			),
		])
	}
}

/// Dynamic-fee transaction (type 0x02).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip1559Transaction {
	pub chain_id: u64,
	pub nonce: u64,
	pub max_priority_fee_per_gas: u128,
	pub max_fee_per_gas: u128,
	pub gas_limit: u64,
	/// `None` deploys a contract (empty `to` field).
	pub to: Option<Address>,
	/// Amount in wei.
	pub value: u128,
	pub data: Vec<u8>,
	pub access_list: Vec<AccessListItem>,
}

impl Eip1559Transaction {
	fn base_fields(&self) -> Vec<Rlp> {
		vec![
			Rlp::uint(self.chain_id as u128),
			Rlp::uint(self.nonce as u128),
			Rlp::uint(self.max_priority_fee_per_gas),
			Rlp::uint(self.max_fee_per_gas),
			Rlp::uint(self.gas_limit as u128),
			to_field(&self.to),
			Rlp::uint(self.value),
			Rlp::bytes(self.data.clone()),
			Rlp::list(self.access_list.iter().map(AccessListItem::to_rlp).collect::<Vec<_>>()),
		]
	}

	/// `0x02 ‖ RLP([chain_id, nonce, fees…, access_list])` — the bytes
	/// whose Keccak-256 is signed.
	pub fn signing_payload(&self) -> Vec<u8> {
		let mut payload = vec![0x02];
		payload.extend_from_slice(&Rlp::list(self.base_fields()).encode());
		payload
	}

	pub fn signing_hash(&self) -> [u8; 32] {
		keccak256(&self.signing_payload())
	}

	/// The broadcastable transaction: the signing payload's list with
	/// `y_parity, r, s` appended.
	pub fn raw_signed(&self, y_parity: u8, r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
		let mut fields = self.base_fields();
		fields.push(Rlp::uint(y_parity as u128));
		fields.push(Rlp::uint_be(r));
		fields.push(Rlp::uint_be(s));
		let mut raw = vec![0x02];
		raw.extend_from_slice(&Rlp::list(fields).encode());
		raw
	}
}

/// Pre-1559 transaction with EIP-155 replay protection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTransaction {
	pub chain_id: u64,
	pub nonce: u64,
	pub gas_price: u128,
	pub gas_limit: u64,
	pub to: Option<Address>,
	pub value: u128,
	pub data: Vec<u8>,
}

impl LegacyTransaction {
	fn base_fields(&self) -> Vec<Rlp> {
		vec![
			Rlp::uint(self.nonce as u128),
			Rlp::uint(self.gas_price),
			Rlp::uint(self.gas_limit as u128),
			to_field(&self.to),
			Rlp::uint(self.value),
			Rlp::bytes(self.data.clone()),
		]
	}

	/// EIP-155: `RLP([nonce, gas_price, gas_limit, to, value, data,
	/// chain_id, 0, 0])`.
	pub fn signing_payload(&self) -> Vec<u8> {
		let mut fields = self.base_fields();
		fields.push(Rlp::uint(self.chain_id as u128));
		fields.push(Rlp::uint(0));
		fields.push(Rlp::uint(0));
		Rlp::list(fields).encode()
	}

	pub fn signing_hash(&self) -> [u8; 32] {
		keccak256(&self.signing_payload())
	}

	/// Replay-protected `v` for a recovery id of 0 or 1.
	pub fn v(&self, recovery_id: u8) -> u64 {
		self.chain_id * 2 + 35 + recovery_id as u64
	}

	pub fn raw_signed(&self, recovery_id: u8, r: &[u8; 32], s: &[u8; 32]) -> Vec<u8> {
		let mut fields = self.base_fields();
		fields.push(Rlp::uint(self.v(recovery_id) as u128));
		fields.push(Rlp::uint_be(r));
		fields.push(Rlp::uint_be(s));
		Rlp::list(fields).encode()
	}
}

fn to_field(to: &Option<Address>) -> Rlp {
	match to {
		Some(address) => Rlp::bytes(address.0),
		None => Rlp::bytes([]),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn eip155_example_signing_payload() {
		// The worked example from EIP-155 itself.
		let tx = LegacyTransaction {
			chain_id: 1,
			nonce: 9,
			gas_price: 20_000_000_000,
			gas_limit: 21_000,
			to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
			value: 1_000_000_000_000_000_000,
			data: Vec::new(),
		};
		assert_eq!(
			hex::encode(tx.signing_payload()),
			"ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76\
			 4000080018080"
		);
		assert_eq!(tx.signing_hash(), keccak256(&tx.signing_payload()));
		assert_eq!(tx.v(0), 37);
		assert_eq!(tx.v(1), 38);
	}

	#[test]
	fn eip1559_payload_is_typed_and_well_formed() {
		let tx = Eip1559Transaction {
			chain_id: 1,
			nonce: 0,
			max_priority_fee_per_gas: 2_000_000_000,
			max_fee_per_gas: 20_000_000_000,
			gas_limit: 21_000,
			to: Some("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap()),
			value: 100_000_000_000_000_000,
			data: Vec::new(),
			access_list: Vec::new(),
		};

		let payload = tx.signing_payload();
		assert_eq!(payload[0], 0x02);
		let Rlp::List(fields) = Rlp::decode(&payload[1..]).unwrap() else {
			panic!("signing payload must decode to a list")
		};
		assert_eq!(fields.len(), 9);
		assert_eq!(fields[0], Rlp::uint(1));
		assert_eq!(fields[8], Rlp::list([]));
	}

	#[test]
	fn raw_signed_appends_signature_fields() {
		let tx = Eip1559Transaction {
			chain_id: 1,
			nonce: 0,
			max_priority_fee_per_gas: 1,
			max_fee_per_gas: 2,
			gas_limit: 21_000,
			to: None,
			value: 0,
			data: vec![0xde, 0xad],
			access_list: Vec::new(),
		};
		let mut r = [0u8; 32];
		r[31] = 7;
		let s = [0x11u8; 32];

		let raw = tx.raw_signed(1, &r, &s);
		let Rlp::List(fields) = Rlp::decode(&raw[1..]).unwrap() else {
			panic!("raw transaction must decode to a list")
		};
		assert_eq!(fields.len(), 12);
		assert_eq!(fields[9], Rlp::uint(1));
		assert_eq!(fields[10], Rlp::uint(7));
		assert_eq!(fields[11], Rlp::bytes(vec![0x11; 32]));
	}

	#[test]
	fn legacy_raw_signed_uses_replay_protected_v() {
		let tx = LegacyTransaction {
			chain_id: 1337,
			nonce: 0,
			gas_price: 1,
			gas_limit: 21_000,
			to: Some(Address([0x22; 20])),
			value: 1,
			data: Vec::new(),
		};
		let raw = tx.raw_signed(1, &[0x01; 32], &[0x02; 32]);
		let Rlp::List(fields) = Rlp::decode(&raw).unwrap() else {
			panic!("raw transaction must decode to a list")
		};
		assert_eq!(fields.len(), 9);
		assert_eq!(fields[6], Rlp::uint(1337 * 2 + 35 + 1));
	}

	#[test]
	fn access_list_entries_encode_as_nested_lists() {
		let item = AccessListItem {
			address: Address([0xaa; 20]),
			storage_keys: vec![[0x01; 32], [0x02; 32]],
		};
		let Rlp::List(fields) = item.to_rlp() else { panic!("expected a list") };
		assert_eq!(fields.len(), 2);
		assert_eq!(fields[0], Rlp::bytes(vec![0xaa; 20]));
		assert_eq!(fields[1], Rlp::list([Rlp::bytes([0x01; 32]), Rlp::bytes([0x02; 32])]));
	}
}
