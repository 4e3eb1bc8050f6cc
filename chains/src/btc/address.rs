//! Receive address issuance from public key material.
//!
//! P2TR addresses are issue-only: the engine produces ECDSA signatures, so
//! funds sent to a taproot address cannot be spent by it.

use bech32::{u5, ToBase32, Variant};
use thiserror::Error;

use super::{hash160, Network};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
	#[error("bech32 encoding failed: {0}")]
	Bech32(String),
}

/// Legacy pay-to-pubkey-hash: `Base58Check(version ‖ hash160(pubkey))`.
pub fn p2pkh_address(network: Network, pubkey: &[u8; 33]) -> String {
	let mut payload = [0u8; 21];
	payload[0] = network.p2pkh_version();
	payload[1..].copy_from_slice(&hash160(pubkey));
	bs58::encode(payload).with_check().into_string()
}

/// Segwit v0 pay-to-witness-pubkey-hash (BIP-173).
pub fn p2wpkh_address(network: Network, pubkey: &[u8; 33]) -> Result<String, AddressError> {
	encode_segwit(network, 0, &hash160(pubkey), Variant::Bech32)
}

/// Segwit v1 pay-to-taproot from an x-only public key (BIP-350).
pub fn p2tr_address(network: Network, x_only_pubkey: &[u8; 32]) -> Result<String, AddressError> {
	encode_segwit(network, 1, x_only_pubkey, Variant::Bech32m)
}

fn encode_segwit(
	network: Network,
	witness_version: u8,
	program: &[u8],
	variant: Variant,
) -> Result<String, AddressError> {
	let mut data = vec![u5::try_from_u8(witness_version)
		.expect("witness version is 0 or 1, both valid base32 values")];
	data.extend(program.to_base32());
	bech32::encode(network.bech32_hrp(), data, variant)
		.map_err(|e| AddressError::Bech32(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	// Compressed public key for secret key 1; hash160 is the BIP-173
	// example witness program 751e76e8199196d454941c45d1b3a323f1433bd6.
	fn generator_pubkey() -> [u8; 33] {
		hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
			.unwrap()
			.try_into()
			.unwrap()
	}

	#[test]
	fn p2wpkh_matches_bip173_vectors() {
		assert_eq!(
			p2wpkh_address(Network::Mainnet, &generator_pubkey()).unwrap(),
			"bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
		);
		assert_eq!(
			p2wpkh_address(Network::Testnet, &generator_pubkey()).unwrap(),
			"tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"
		);
	}

	#[test]
	fn p2pkh_is_base58check_of_versioned_hash160() {
		let address = p2pkh_address(Network::Mainnet, &generator_pubkey());
		assert_eq!(address, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");

		let decoded = bs58::decode(&address).with_check(None).into_vec().unwrap();
		assert_eq!(decoded[0], 0x00);
		assert_eq!(decoded[1..], hash160(&generator_pubkey()));
	}

	#[test]
	fn testnet_and_regtest_share_the_version_byte() {
		let testnet = p2pkh_address(Network::Testnet, &generator_pubkey());
		let regtest = p2pkh_address(Network::Regtest, &generator_pubkey());
		assert_eq!(testnet, regtest);
		assert!(testnet.starts_with('m') || testnet.starts_with('n'));
	}

	#[test]
	fn p2tr_uses_bech32m_with_witness_version_one() {
		let x_only: [u8; 32] = generator_pubkey()[1..].try_into().unwrap();
		let address = p2tr_address(Network::Mainnet, &x_only).unwrap();
		assert!(address.starts_with("bc1p"));

		let (hrp, data, variant) = bech32::decode(&address).unwrap();
		assert_eq!(hrp, "bc");
		assert_eq!(variant, Variant::Bech32m);
		assert_eq!(data[0].to_u8(), 1);
		assert_eq!(bech32::convert_bits(&data[1..], 5, 8, false).unwrap(), x_only);
	}
}
