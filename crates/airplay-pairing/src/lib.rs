//! # airplay-pairing
//!
//! Receiver-side authentication and media decryption for AirPlay.
//!
//! This crate implements:
//! - The receiver's persistent device identity (Ed25519 + Curve25519)
//! - Pair-verify (Curve25519 ECDH, AES-CTR encrypted Ed25519 signatures)
//! - The legacy RSA-wrapped AES key path
//! - Per-stream AES-CTR media decryption

mod identity;
mod media;
mod pair_verify;
mod session;

pub use identity::DeviceIdentity;
pub use media::MediaStreamCipher;
pub use pair_verify::{PairVerifyClient, PairVerifyReply, PairVerifyRequest};
pub use session::{ConnectionCryptoSession, SessionState};
