//! Scalar and point arithmetic for the signing protocol, backed by
//! libsecp. libsecp has no encoding for the zero scalar or the point at
//! infinity, yet both turn up as intermediate values when additive
//! shares are combined, so both newtypes reserve `None` for exactly
//! that case and the operators fold it through the algebra.
//!
//! Secret-dependent multiplications go through libsecp's constant-time
//! tweak routines. The `num-bigint` arithmetic below only ever touches
//! public values (`r`, `s`, `k_total`, encodings), where timing is
//! irrelevant.

use num_bigint::BigUint;
use num_traits::identities::Zero;
use secp256k1::constants::{self, CURVE_ORDER};
use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

use super::{
	helpers::{serialize_fixed_bytes, ArrayVisitor},
	CryptoError,
};

/// A scalar mod the group order; `None` is zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scalar(Option<SecretKey>);

/// An affine curve point; `None` is the point at infinity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Point(Option<PublicKey>);

const SCALAR_SIZE: usize = 32;
const ZERO_SCALAR_BYTES: [u8; SCALAR_SIZE] = [0; SCALAR_SIZE];
const IDENTITY_BYTES: [u8; 33] = [0; 33];

lazy_static::lazy_static! {
	static ref GROUP_ORDER: BigUint = BigUint::from_bytes_be(&CURVE_ORDER);
	// The BIP-62 boundary: scalars above (order - 1) / 2 are "high"
	static ref HALF_GROUP_ORDER: BigUint = (&*GROUP_ORDER - 1u32) / 2u32;
	static ref GENERATOR: Point = {
		let mut encoded = [0u8; 65];
		encoded[0] = 0x04;
		encoded[1..33].copy_from_slice(&constants::GENERATOR_X);
		encoded[33..].copy_from_slice(&constants::GENERATOR_Y);
		Point(Some(PublicKey::from_slice(&encoded).expect("libsecp's generator constants lie on the curve")))
	};
}

impl Scalar {
	pub fn random(rng: &mut crate::crypto::Rng) -> Self {
		// libsecp rejection-samples away zero and out-of-range values,
		// so the result is always a usable secret
		Scalar(Some(SecretKey::new(rng)))
	}

	pub fn zero() -> Self {
		Scalar(None)
	}

	pub fn is_zero(&self) -> bool {
		self.0.is_none()
	}

	pub fn as_bytes(&self) -> &[u8; SCALAR_SIZE] {
		match &self.0 {
			Some(sk) => sk.as_ref(),
			None => &ZERO_SCALAR_BYTES,
		}
	}

	/// Strict parsing: accepts canonical values below the group order
	/// (zero included) and nothing else.
	pub fn from_bytes(bytes: &[u8; SCALAR_SIZE]) -> Result<Self, CryptoError> {
		if bytes == &ZERO_SCALAR_BYTES {
			Ok(Scalar(None))
		} else {
			SecretKey::from_slice(bytes)
				.map(|sk| Scalar(Some(sk)))
				.map_err(|_| CryptoError::InvalidScalar)
		}
	}

	/// Interpret 32 bytes as an integer and reduce it into the group.
	/// Used where the input is a hash rather than an encoded scalar.
	pub fn from_bytes_mod_order(bytes: &[u8; SCALAR_SIZE]) -> Self {
		Self::from_reduced(&(BigUint::from_bytes_be(bytes) % &*GROUP_ORDER))
	}

	/// Build a scalar from an integer already known to be `< order`.
	fn from_reduced(value: &BigUint) -> Self {
		debug_assert!(value < &*GROUP_ORDER);

		if value.is_zero() {
			return Scalar(None);
		}
		let digits = value.to_bytes_be();
		let mut bytes = ZERO_SCALAR_BYTES;
		bytes[SCALAR_SIZE - digits.len()..].copy_from_slice(&digits);
		Scalar(Some(SecretKey::from_slice(&bytes).expect("a reduced non-zero value is a valid key")))
	}

	/// Fermat inversion, `x^(order - 2) mod order`. Only public values
	/// (`k_total`, `r`, party counts) are ever inverted, so the variable
	/// timing of bigint exponentiation leaks nothing secret.
	pub fn invert(&self) -> Option<Self> {
		self.0.map(|sk| {
			let inverse = BigUint::from_bytes_be(sk.as_ref())
				.modpow(&(&*GROUP_ORDER - 2u32), &GROUP_ORDER);
			Self::from_reduced(&inverse)
		})
	}

	/// Whether this scalar violates BIP-62 low-S. Called on signature
	/// `s` components only.
	pub fn is_high(&self) -> bool {
		BigUint::from_bytes_be(self.as_bytes()) > *HALF_GROUP_ORDER
	}

	pub fn negate(&self) -> Self {
		// libsecp negation is total on valid keys; -0 stays 0
		Scalar(self.0.map(|sk| sk.negate()))
	}
}

impl From<u32> for Scalar {
	fn from(value: u32) -> Self {
		let mut bytes = ZERO_SCALAR_BYTES;
		bytes[SCALAR_SIZE - 4..].copy_from_slice(&value.to_be_bytes());
		Scalar::from_bytes(&bytes).expect("a u32 is far below the group order")
	}
}

impl std::ops::Add for &Scalar {
	type Output = Scalar;

	fn add(self, rhs: Self) -> Scalar {
		match (self.0, rhs.0) {
			// `add_tweak` errors exactly when the sum is zero mod the
			// order, which is our `None`
			(Some(a), Some(b)) => Scalar(a.add_tweak(&b.into()).ok()),
			(a, b) => Scalar(a.or(b)),
		}
	}
}

impl std::ops::Sub for &Scalar {
	type Output = Scalar;

	// Clippy dislikes `+` inside `sub`; negating the right operand
	// first is the whole point
	#[allow(clippy::suspicious_arithmetic_impl)]
	fn sub(self, rhs: Self) -> Scalar {
		self + &rhs.negate()
	}
}

impl std::ops::Mul for &Scalar {
	type Output = Scalar;

	fn mul(self, rhs: Self) -> Scalar {
		match (self.0, rhs.0) {
			(Some(a), Some(b)) => Scalar(Some(
				// the order is prime, so a product of two non-zero
				// scalars cannot be zero
				a.mul_tweak(&b.into()).expect("non-zero operands have a non-zero product"),
			)),
			_ => Scalar(None),
		}
	}
}

impl std::ops::Add for Scalar {
	type Output = Scalar;

	fn add(self, rhs: Self) -> Scalar {
		&self + &rhs
	}
}

impl std::ops::Add<&Scalar> for Scalar {
	type Output = Scalar;

	fn add(self, rhs: &Scalar) -> Scalar {
		&self + rhs
	}
}

impl std::ops::Sub for Scalar {
	type Output = Scalar;

	fn sub(self, rhs: Self) -> Scalar {
		&self - &rhs
	}
}

impl std::ops::Mul for Scalar {
	type Output = Scalar;

	fn mul(self, rhs: Self) -> Scalar {
		&self * &rhs
	}
}

impl std::ops::Mul<&Scalar> for Scalar {
	type Output = Scalar;

	fn mul(self, rhs: &Scalar) -> Scalar {
		&self * rhs
	}
}

impl std::iter::Sum for Scalar {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Scalar::zero(), |acc, x| acc + x)
	}
}

impl<'a> std::iter::Sum<&'a Scalar> for Scalar {
	fn sum<I: Iterator<Item = &'a Scalar>>(iter: I) -> Self {
		iter.fold(Scalar::zero(), |acc, x| acc + x)
	}
}

impl Ord for Scalar {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.as_bytes().cmp(other.as_bytes())
	}
}

impl PartialOrd for Scalar {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl zeroize::Zeroize for Scalar {
	fn zeroize(&mut self) {
		use core::sync::atomic;
		// Volatile so the wipe survives optimization
		unsafe { std::ptr::write_volatile(self, Scalar::zero()) };
		atomic::compiler_fence(atomic::Ordering::SeqCst);
	}
}

impl Drop for Scalar {
	fn drop(&mut self) {
		use zeroize::Zeroize;
		self.zeroize();
	}
}

impl zeroize::ZeroizeOnDrop for Scalar {}

impl Serialize for Scalar {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serialize_fixed_bytes(self.as_bytes(), serializer)
	}
}

impl<'de> Deserialize<'de> for Scalar {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let bytes = deserializer
			.deserialize_tuple(SCALAR_SIZE, ArrayVisitor::<[u8; SCALAR_SIZE]>::new())?;
		Scalar::from_bytes(&bytes).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
impl Scalar {
	pub fn from_hex(hex_str: &str) -> Self {
		let bytes: [u8; SCALAR_SIZE] = hex::decode(hex_str)
			.expect("input must be hex encoded")
			.try_into()
			.expect("input must be 32 bytes");
		Scalar::from_bytes(&bytes).expect("input must be a canonical scalar")
	}
}

impl Point {
	pub fn from_scalar(scalar: &Scalar) -> Self {
		*GENERATOR * scalar
	}

	pub fn point_at_infinity() -> Self {
		Point(None)
	}

	pub fn is_point_at_infinity(&self) -> bool {
		self.0.is_none()
	}

	/// SEC1 compressed encoding, with all zeros standing in for the
	/// point at infinity (which SEC1 cannot express).
	pub fn as_bytes(&self) -> [u8; 33] {
		match self.0 {
			Some(pk) => pk.serialize(),
			None => IDENTITY_BYTES,
		}
	}

	pub fn from_bytes(bytes: &[u8; 33]) -> Result<Self, CryptoError> {
		if bytes == &IDENTITY_BYTES {
			Ok(Point(None))
		} else {
			PublicKey::from_slice(bytes)
				.map(|pk| Point(Some(pk)))
				.map_err(|_| CryptoError::InvalidPoint)
		}
	}

	/// Lift an x coordinate onto the curve with the requested y parity.
	/// Fails if no curve point has this x coordinate.
	pub fn lift_x(x_bytes: &[u8; 32], odd_y: bool) -> Result<Self, CryptoError> {
		let mut encoded = [0u8; 33];
		encoded[0] = if odd_y { 0x03 } else { 0x02 };
		encoded[1..].copy_from_slice(x_bytes);
		Point::from_bytes(&encoded)
	}

	/// The inner libsecp key. Callers reach for this on aggregate
	/// public values only, which earlier protocol checks have already
	/// ruled out being the identity.
	pub fn get_element(&self) -> PublicKey {
		self.0.expect("the point at infinity has no libsecp representation")
	}

	pub fn x_bytes(&self) -> [u8; 32] {
		self.as_bytes()[1..].try_into().expect("compressed encoding is 33 bytes")
	}

	pub fn is_even_y(&self) -> bool {
		self.as_bytes()[0] == 0x02
	}
}

impl<B: std::borrow::Borrow<Scalar>> std::ops::Mul<B> for Point {
	type Output = Self;

	fn mul(self, scalar: B) -> Self {
		match (self.0, scalar.borrow().0) {
			(Some(point), Some(scalar)) => Point(Some(
				// a non-zero scalar times a finite point of prime order
				// is again a finite point
				point
					.mul_tweak(secp256k1::SECP256K1, &scalar.into())
					.expect("non-zero scalar times a finite point"),
			)),
			// either operand being zero collapses the product
			_ => Point(None),
		}
	}
}

impl std::ops::Add for Point {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		match (self.0, rhs.0) {
			// `combine` errors exactly when the sum is the identity
			(Some(a), Some(b)) => Point(a.combine(&b).ok()),
			(a, b) => Point(a.or(b)),
		}
	}
}

impl std::ops::Sub for Point {
	type Output = Self;

	// Clippy dislikes `+` inside `sub`; negating the right operand
	// first is the whole point
	#[allow(clippy::suspicious_arithmetic_impl)]
	fn sub(self, rhs: Self) -> Self {
		self + Point(rhs.0.map(|p| p.negate(secp256k1::SECP256K1)))
	}
}

impl std::iter::Sum for Point {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Point::point_at_infinity(), |acc, x| acc + x)
	}
}

impl Serialize for Point {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serialize_fixed_bytes(&self.as_bytes(), serializer)
	}
}

impl<'de> Deserialize<'de> for Point {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let bytes = deserializer.deserialize_tuple(33, ArrayVisitor::<[u8; 33]>::new())?;
		Point::from_bytes(&bytes).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
impl Point {
	pub fn random(rng: &mut crate::crypto::Rng) -> Self {
		Point::from_scalar(&Scalar::random(rng))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Rng;
	use rand::SeedableRng;

	#[test]
	fn serde_round_trips_preserve_values() {
		let mut rng = Rng::from_seed([0; 32]);

		let scalar = Scalar::random(&mut rng);
		let scalar_json = serde_json::to_string(&scalar).unwrap();
		let scalar_recovered: Scalar = serde_json::from_str(&scalar_json).unwrap();
		assert_eq!(scalar, scalar_recovered);

		let point = Point::from_scalar(&scalar);
		let point_json = serde_json::to_string(&point).unwrap();
		let point_recovered: Point = serde_json::from_str(&point_json).unwrap();
		assert_eq!(point, point_recovered);

		// The identity and the zero scalar are preserved too
		let zero_json = serde_json::to_string(&Scalar::zero()).unwrap();
		assert!(serde_json::from_str::<Scalar>(&zero_json).unwrap().is_zero());
		let infinity_json = serde_json::to_string(&Point::point_at_infinity()).unwrap();
		assert!(serde_json::from_str::<Point>(&infinity_json)
			.unwrap()
			.is_point_at_infinity());
	}

	#[test]
	fn scalar_arithmetic_is_modular() {
		let one = Scalar::from(1);
		let two = Scalar::from(2);
		let three = Scalar::from(3);

		assert_eq!(one.clone() + two.clone(), three);
		assert_eq!(&three - &one, two);
		assert_eq!(three.clone() - three.clone(), Scalar::zero());
		assert_eq!(two.clone() * Scalar::zero(), Scalar::zero());

		// x * x^-1 == 1
		let mut rng = Rng::from_seed([1; 32]);
		let x = Scalar::random(&mut rng);
		assert_eq!(x.clone() * x.invert().unwrap(), one);
		assert_eq!(Scalar::zero().invert(), None);
	}

	#[test]
	fn point_arithmetic_matches_scalar_arithmetic() {
		let mut rng = Rng::from_seed([2; 32]);
		let a = Scalar::random(&mut rng);
		let b = Scalar::random(&mut rng);

		assert_eq!(
			Point::from_scalar(&a) + Point::from_scalar(&b),
			Point::from_scalar(&(&a + &b))
		);
		assert_eq!(
			Point::from_scalar(&a) - Point::from_scalar(&b),
			Point::from_scalar(&(&a - &b))
		);
		// P - P is the point at infinity, encoded as 33 zero bytes
		let infinity = Point::from_scalar(&a) - Point::from_scalar(&a);
		assert!(infinity.is_point_at_infinity());
		assert_eq!(infinity.as_bytes(), [0; 33]);
	}

	#[test]
	fn negation_is_additive_inverse() {
		let mut rng = Rng::from_seed([3; 32]);
		let x = Scalar::random(&mut rng);
		assert_eq!(x.clone() + x.negate(), Scalar::zero());
		assert_eq!(Scalar::zero().negate(), Scalar::zero());
	}

	#[test]
	fn lift_x_recovers_both_parities() {
		let mut rng = Rng::from_seed([4; 32]);
		let point = Point::random(&mut rng);

		let even = Point::lift_x(&point.x_bytes(), false).unwrap();
		let odd = Point::lift_x(&point.x_bytes(), true).unwrap();

		assert!(even.is_even_y());
		assert!(!odd.is_even_y());
		assert!(point == even || point == odd);
		// The two lifts are negations of each other
		assert!((even + odd).is_point_at_infinity());
	}

	#[test]
	fn strict_scalar_parsing_rejects_group_order() {
		assert_eq!(Scalar::from_bytes(&CURVE_ORDER), Err(CryptoError::InvalidScalar));
		assert_eq!(Scalar::from_bytes(&[0xff; 32]), Err(CryptoError::InvalidScalar));
		assert!(Scalar::from_bytes(&[0; 32]).unwrap().is_zero());

		// from_bytes_mod_order reduces instead
		assert!(!Scalar::from_bytes_mod_order(&[0xff; 32]).is_zero());
		assert!(Scalar::from_bytes_mod_order(&CURVE_ORDER).is_zero());
	}

	#[test]
	fn is_high_splits_the_group_in_half() {
		assert!(!Scalar::from(1).is_high());
		assert!(!Scalar::zero().is_high());
		// -1 == order - 1, the highest scalar
		assert!(Scalar::from(1).negate().is_high());

		let mut rng = Rng::from_seed([5; 32]);
		let s = Scalar::random(&mut rng);
		// Exactly one of s and -s is high (s != 0)
		assert_ne!(s.is_high(), s.negate().is_high());
	}

	#[test]
	fn one_times_the_generator_is_the_generator() {
		assert_eq!(
			hex::encode(Point::from_scalar(&Scalar::from(1)).as_bytes()),
			"0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
		);
	}
}
