//! Curve25519 ECDH for session key agreement.

use airplay_core::error::CryptoError;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::keys::{SecretBytes, SharedSecret};

/// Long-lived Curve25519 key pair.
///
/// The secret is a `StaticSecret`, which x25519-dalek zeroizes on drop.
/// No `Debug` or `Clone`.
pub struct AgreementKeyPair {
    public: [u8; 32],
    secret: StaticSecret,
}

impl AgreementKeyPair {
    /// Generate a new random key pair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let bytes = SecretBytes::<32>::random()?;
        Ok(Self::from_secret(bytes.expose()))
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Export the secret scalar for persistence.
    pub fn secret_bytes(&self) -> SecretBytes<32> {
        SecretBytes::new(self.secret.to_bytes())
    }

    /// Perform Diffie-Hellman key agreement with a peer's public key.
    ///
    /// The scalar multiplication is constant time. Low-order peer points
    /// produce an all-zero output, which is rejected.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> Result<SharedSecret, CryptoError> {
        let their_public = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&their_public);

        if !shared.was_contributory() {
            return Err(CryptoError::KeyDerivation(
                "Weak ECDH: peer public key is a low-order point".to_string(),
            ));
        }

        Ok(SecretBytes::new(shared.to_bytes()))
    }
}
