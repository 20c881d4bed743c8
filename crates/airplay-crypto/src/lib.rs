//! # airplay-crypto
//!
//! Cryptographic primitives for the AirPlay receiver's pairing handshake and
//! media decryption.
//!
//! This crate provides:
//! - Curve25519 ECDH for key agreement
//! - Ed25519 for digital signatures
//! - SHA-512 label derivation of AES keys
//! - AES-128-CTR keystreams and AES-128-CBC for legacy audio
//! - RSA-OAEP unwrapping of legacy session keys
//!
//! All secret material is zeroized on drop.

pub mod aes;
pub mod curve25519;
pub mod ed25519;
pub mod kdf;
pub mod keys;
pub mod rsa;

pub use self::aes::{AesCbcCipher, AesCtrCipher};
pub use self::rsa::LegacyKeyUnwrapper;
pub use curve25519::AgreementKeyPair;
pub use ed25519::SigningKeyPair;
pub use keys::{AesKeyMaterial, SecretBytes, SharedSecret};
