//! Ed25519 digital signatures for identity verification.

use airplay_core::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::keys::SecretBytes;

/// Long-term Ed25519 signing key pair.
///
/// `SigningKey` zeroizes its seed on drop.
pub struct SigningKeyPair {
    public: [u8; 32],
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random signing key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let seed = SecretBytes::<32>::random()?;
        Ok(Self::from_seed(seed.expose()))
    }

    /// Create from seed bytes (32 bytes).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public = signing_key.verifying_key().to_bytes();
        Self {
            public,
            signing_key,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Sign a message, returning a 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Export the seed for storage (32 bytes).
    pub fn seed(&self) -> SecretBytes<32> {
        SecretBytes::new(self.signing_key.to_bytes())
    }
}

/// Verify an Ed25519 signature with strict validation.
///
/// Malformed public keys, non-canonical signatures and small-order
/// components all yield `false`.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &sig).is_ok()
}
