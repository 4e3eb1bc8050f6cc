//! Threshold-ECDSA custody engine over secp256k1.
//!
//! A vault's master key is additively split across `n` guardians and is
//! never reassembled; guardians jointly produce standard ECDSA signatures
//! that Bitcoin and Ethereum accept. The crate provides:
//!
//! - [`crypto`]: scalar/point primitives over libsecp;
//! - [`share`]: the additive share algebra;
//! - [`bip32`] and [`keygen`]: threshold BIP-32 (collaborative hardened
//!   descent, independent non-hardened derivation) and vault setup;
//! - [`signing`]: the four-round signing protocol;
//! - [`coordinator`]: the session state machine and service driving
//!   ceremonies over asynchronous guardian connections;
//! - [`guardian`]: the pure per-party entry points;
//! - [`share_file`]: the persisted share format.
//!
//! The protocol is honest-but-curious: guardians forward their nonces to
//! the coordinator, which therefore must be trusted not to collude with
//! a guardian. Malicious-secure variants (MtA-based) replace exactly the
//! `k_total` algebra and are out of scope here.

pub mod bip32;
pub mod coordinator;
pub mod crypto;
pub mod guardian;
pub mod keygen;
pub mod share;
pub mod share_file;
pub mod signing;

pub use coordinator::{Config, Coordinator, CoordinatorError, SigningRequest};
pub use crypto::{Point, Rng, Scalar};
pub use share::{KeyShare, ShareLevel};
pub use signing::ThresholdSignature;
