//! Secret key containers.
//!
//! Every type here zeroizes its bytes on drop and redacts them from `Debug`.
//! None of them implement `Display` or any serialization trait.

use std::fmt;

use airplay_core::error::CryptoError;
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Fixed-size secret bytes.
#[derive(Clone)]
pub struct SecretBytes<const N: usize>([u8; N]);

/// Raw output of a Curve25519 key agreement.
pub type SharedSecret = SecretBytes<32>;

impl<const N: usize> SecretBytes<N> {
    /// Wrap raw bytes.
    pub fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Copy from a slice that must be exactly `N` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; N] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: N,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Fill with bytes from the OS random source.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; N];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Borrow the raw bytes.
    pub fn expose(&self) -> &[u8; N] {
        &self.0
    }

    /// True if every byte is zero.
    pub fn is_all_zero(&self) -> bool {
        self.0[..].ct_eq(&[0u8; N][..]).into()
    }
}

impl<const N: usize> Drop for SecretBytes<N> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> ZeroizeOnDrop for SecretBytes<N> {}

impl<const N: usize> ConstantTimeEq for SecretBytes<N> {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0[..].ct_eq(&other.0[..])
    }
}

impl<const N: usize> PartialEq for SecretBytes<N> {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl<const N: usize> Eq for SecretBytes<N> {}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{}>(..)", N)
    }
}

/// AES-128 key and initial counter/IV block.
///
/// Only the key is secret; the IV is kept alongside because every AirPlay
/// derivation produces the pair together.
#[derive(Clone)]
pub struct AesKeyMaterial {
    key: SecretBytes<16>,
    iv: [u8; 16],
}

impl AesKeyMaterial {
    /// Create from a 16-byte key and 16-byte IV.
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            key: SecretBytes::new(key),
            iv,
        }
    }

    /// Create from slices, validating both lengths.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key = SecretBytes::from_slice(key)?;
        let iv: [u8; 16] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 16,
            actual: iv.len(),
        })?;
        Ok(Self { key, iv })
    }

    /// The AES-128 key.
    pub fn key(&self) -> &[u8; 16] {
        self.key.expose()
    }

    /// The IV / initial counter block.
    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}

impl fmt::Debug for AesKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesKeyMaterial")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Fill `buf` from the OS random source.
///
/// Fails with `RandomSourceUnavailable` instead of panicking when the
/// platform RNG cannot be read.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomSourceUnavailable(e.to_string()))
}

/// Copy the first `N` bytes of a digest into a zeroizing array.
pub(crate) fn truncate<const N: usize>(digest: &[u8]) -> Zeroizing<[u8; N]> {
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&digest[..N]);
    out
}
