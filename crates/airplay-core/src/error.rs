//! Error types for the AirPlay receiver.

use thiserror::Error;

/// Primary error type for all receiver operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a connection's crypto session.
///
/// Messages describe what was wrong with the input, never the key bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(&'static str),

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Media stream not initialized")]
    StreamNotInitialized,

    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Identity store error: {0}")]
    IdentityStore(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
}

/// Receiver configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing value for {0}")]
    MissingValue(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
