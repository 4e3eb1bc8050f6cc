mod helpers;
pub mod secp256k1;

pub use self::secp256k1::{Point, Scalar};

use thiserror::Error;

/// The generator every share and nonce is sampled from. `StdRng` is
/// cryptographically secure and seedable, which the deterministic tests
/// rely on.
pub type Rng = rand::rngs::StdRng;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
	#[error("invalid compressed point encoding")]
	InvalidPoint,
	#[error("invalid scalar encoding")]
	InvalidScalar,
}
