//! RSA-OAEP unwrapping of legacy (RAOP) AES session keys.
//!
//! Legacy clients send the AES key encrypted to the receiver's fixed RSA
//! public key using OAEP with SHA-1 (`rsaaeskey`). The private key is
//! loaded from a PEM file at startup.

use std::fmt;
use std::path::Path;

use airplay_core::error::{CryptoError, Error};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Holds the receiver's RSA private key.
pub struct LegacyKeyUnwrapper {
    key: RsaPrivateKey,
}

impl LegacyKeyUnwrapper {
    /// Wrap an already parsed private key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8 (`BEGIN PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|_| {
                CryptoError::InvalidKeyFormat(
                    "RSA private key is not valid PKCS#1 or PKCS#8 PEM".to_string(),
                )
            })?;
        Ok(Self { key })
    }

    /// Read and parse a PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let pem = Zeroizing::new(std::fs::read_to_string(path.as_ref())?);
        Ok(Self::from_pem(&pem)?)
    }

    /// Decrypt an OAEP(SHA-1) wrapped key.
    ///
    /// Length checks on the recovered key are left to the caller.
    pub fn unwrap_key(&self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.key
            .decrypt(Oaep::new::<sha1::Sha1>(), encrypted)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::Decryption("RSA-OAEP unwrap failed".to_string()))
    }

    /// The matching public key, as legacy senders would hold it.
    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }
}

impl fmt::Debug for LegacyKeyUnwrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyKeyUnwrapper").finish_non_exhaustive()
    }
}
