//! Bitcoin transaction model and the two sighash constructions fed
//! to the signing protocol. Serialization follows consensus encoding
//! exactly: the digests must be bit-identical to what nodes compute.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sha256d;

/// The only sighash flag the engine signs with.
pub const SIGHASH_ALL: u32 = 0x01;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TxError {
	#[error("input index {index} out of range ({inputs} inputs)")]
	InputIndexOutOfRange { index: usize, inputs: usize },
	#[error("unsupported sighash type {0:#x}")]
	UnsupportedSighashType(u32),
}

/// Reference to the output being spent. `txid` is in wire order
/// (i.e. the byte-reversed form of the usual display hex).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
	pub txid: [u8; 32],
	pub vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
	pub previous_output: OutPoint,
	pub script_sig: Vec<u8>,
	pub sequence: u32,
	pub witness: Vec<Vec<u8>>,
}

impl TxIn {
	pub fn new(previous_output: OutPoint) -> Self {
		TxIn { previous_output, script_sig: Vec::new(), sequence: 0xffff_ffff, witness: Vec::new() }
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
	/// Amount in satoshis.
	pub value: u64,
	pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub version: i32,
	pub inputs: Vec<TxIn>,
	pub outputs: Vec<TxOut>,
	pub lock_time: u32,
}

impl Transaction {
	/// Legacy serialization (no witness data).
	pub fn serialize(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		buf.extend_from_slice(&self.version.to_le_bytes());
		write_varint(&mut buf, self.inputs.len() as u64);
		for input in &self.inputs {
			write_outpoint(&mut buf, &input.previous_output);
			write_var_bytes(&mut buf, &input.script_sig);
			buf.extend_from_slice(&input.sequence.to_le_bytes());
		}
		write_varint(&mut buf, self.outputs.len() as u64);
		for output in &self.outputs {
			write_txout(&mut buf, output);
		}
		buf.extend_from_slice(&self.lock_time.to_le_bytes());
		buf
	}

	/// Segwit serialization (BIP-144): marker/flag and witness stacks are
	/// included only when at least one input carries a witness.
	pub fn serialize_with_witness(&self) -> Vec<u8> {
		if self.inputs.iter().all(|input| input.witness.is_empty()) {
			return self.serialize();
		}
		let mut buf = Vec::new();
		buf.extend_from_slice(&self.version.to_le_bytes());
		buf.push(0x00); // marker
		buf.push(0x01); // flag
		write_varint(&mut buf, self.inputs.len() as u64);
		for input in &self.inputs {
			write_outpoint(&mut buf, &input.previous_output);
			write_var_bytes(&mut buf, &input.script_sig);
			buf.extend_from_slice(&input.sequence.to_le_bytes());
		}
		write_varint(&mut buf, self.outputs.len() as u64);
		for output in &self.outputs {
			write_txout(&mut buf, output);
		}
		for input in &self.inputs {
			write_varint(&mut buf, input.witness.len() as u64);
			for item in &input.witness {
				write_var_bytes(&mut buf, item);
			}
		}
		buf.extend_from_slice(&self.lock_time.to_le_bytes());
		buf
	}

	/// Transaction id (wire order): sha256d of the legacy serialization.
	pub fn txid(&self) -> [u8; 32] {
		sha256d(&self.serialize())
	}

	/// Legacy sighash: the input being signed gets `script_code` as its
	/// scriptSig, every other input an empty one, and the 4-byte sighash
	/// type is appended before double hashing.
	pub fn legacy_sighash(
		&self,
		input_index: usize,
		script_code: &[u8],
		sighash_type: u32,
	) -> Result<[u8; 32], TxError> {
		self.check_signable(input_index, sighash_type)?;

		let mut buf = Vec::new();
		buf.extend_from_slice(&self.version.to_le_bytes());
		write_varint(&mut buf, self.inputs.len() as u64);
		for (i, input) in self.inputs.iter().enumerate() {
			write_outpoint(&mut buf, &input.previous_output);
			if i == input_index {
				write_var_bytes(&mut buf, script_code);
			} else {
				write_varint(&mut buf, 0);
			}
			buf.extend_from_slice(&input.sequence.to_le_bytes());
		}
		write_varint(&mut buf, self.outputs.len() as u64);
		for output in &self.outputs {
			write_txout(&mut buf, output);
		}
		buf.extend_from_slice(&self.lock_time.to_le_bytes());
		buf.extend_from_slice(&sighash_type.to_le_bytes());
		Ok(sha256d(&buf))
	}

	/// Segwit v0 sighash (BIP-143). `amount` is the value of the output
	/// being spent, which the preimage commits to.
	pub fn segwit_v0_sighash(
		&self,
		input_index: usize,
		script_code: &[u8],
		amount: u64,
		sighash_type: u32,
	) -> Result<[u8; 32], TxError> {
		self.check_signable(input_index, sighash_type)?;

		let hash_prevouts = {
			let mut buf = Vec::new();
			for input in &self.inputs {
				write_outpoint(&mut buf, &input.previous_output);
			}
			sha256d(&buf)
		};
		let hash_sequence = {
			let mut buf = Vec::new();
			for input in &self.inputs {
				buf.extend_from_slice(&input.sequence.to_le_bytes());
			}
			sha256d(&buf)
		};
		let hash_outputs = {
			let mut buf = Vec::new();
			for output in &self.outputs {
				write_txout(&mut buf, output);
			}
			sha256d(&buf)
		};

		let input = &self.inputs[input_index];
		let mut buf = Vec::new();
		buf.extend_from_slice(&self.version.to_le_bytes());
		buf.extend_from_slice(&hash_prevouts);
		buf.extend_from_slice(&hash_sequence);
		write_outpoint(&mut buf, &input.previous_output);
		write_var_bytes(&mut buf, script_code);
		buf.extend_from_slice(&amount.to_le_bytes());
		buf.extend_from_slice(&input.sequence.to_le_bytes());
		buf.extend_from_slice(&hash_outputs);
		buf.extend_from_slice(&self.lock_time.to_le_bytes());
		buf.extend_from_slice(&sighash_type.to_le_bytes());
		Ok(sha256d(&buf))
	}

	fn check_signable(&self, input_index: usize, sighash_type: u32) -> Result<(), TxError> {
		if input_index >= self.inputs.len() {
			return Err(TxError::InputIndexOutOfRange {
				index: input_index,
				inputs: self.inputs.len(),
			});
		}
		if sighash_type != SIGHASH_ALL {
			return Err(TxError::UnsupportedSighashType(sighash_type));
		}
		Ok(())
	}
}

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
	let mut script = Vec::with_capacity(25);
	script.extend_from_slice(&[0x76, 0xa9, 0x14]);
	script.extend_from_slice(pubkey_hash);
	script.extend_from_slice(&[0x88, 0xac]);
	script
}

/// `OP_0 <20>`
pub fn p2wpkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
	let mut script = Vec::with_capacity(22);
	script.extend_from_slice(&[0x00, 0x14]);
	script.extend_from_slice(pubkey_hash);
	script
}

/// scriptSig spending a P2PKH output: `<sig ‖ sighash_byte> <pubkey>`.
pub fn p2pkh_script_sig(signature_with_hashtype: &[u8], pubkey: &[u8; 33]) -> Vec<u8> {
	let mut script = Vec::with_capacity(signature_with_hashtype.len() + 35);
	script.push(signature_with_hashtype.len() as u8);
	script.extend_from_slice(signature_with_hashtype);
	script.push(33);
	script.extend_from_slice(pubkey);
	script
}

/// Witness stack spending a P2WPKH output.
pub fn p2wpkh_witness(signature_with_hashtype: &[u8], pubkey: &[u8; 33]) -> Vec<Vec<u8>> {
	vec![signature_with_hashtype.to_vec(), pubkey.to_vec()]
}

fn write_outpoint(buf: &mut Vec<u8>, outpoint: &OutPoint) {
	buf.extend_from_slice(&outpoint.txid);
	buf.extend_from_slice(&outpoint.vout.to_le_bytes());
}

fn write_txout(buf: &mut Vec<u8>, output: &TxOut) {
	buf.extend_from_slice(&output.value.to_le_bytes());
	write_var_bytes(buf, &output.script_pubkey);
}

fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
	write_varint(buf, bytes.len() as u64);
	buf.extend_from_slice(bytes);
}

fn write_varint(buf: &mut Vec<u8>, value: u64) {
	match value {
		0..=0xfc => buf.push(value as u8),
		0xfd..=0xffff => {
			buf.push(0xfd);
			buf.extend_from_slice(&(value as u16).to_le_bytes());
		},
		0x1_0000..=0xffff_ffff => {
			buf.push(0xfe);
			buf.extend_from_slice(&(value as u32).to_le_bytes());
		},
		_ => {
			buf.push(0xff);
			buf.extend_from_slice(&value.to_le_bytes());
		},
	}
}
