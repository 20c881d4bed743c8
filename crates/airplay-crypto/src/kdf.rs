//! SHA-512 label derivation for AirPlay receiver keys.
//!
//! AirPlay does not use HKDF for these keys. Each AES key or IV is the first
//! 16 bytes of `SHA-512(label || secret)`, where the label is a fixed ASCII
//! string. Handshake and media labels differ, and media labels embed the
//! stream identifier, so every derived key is independent.

use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::keys::{truncate, AesKeyMaterial, SharedSecret};

/// Well-known labels used by AirPlay receivers.
pub mod constants {
    pub const PAIR_VERIFY_AES_KEY: &[u8] = b"Pair-Verify-AES-Key";
    pub const PAIR_VERIFY_AES_IV: &[u8] = b"Pair-Verify-AES-IV";

    /// Followed by the decimal stream connection id.
    pub const STREAM_KEY_PREFIX: &[u8] = b"AirPlayStreamKey";
    /// Followed by the decimal stream connection id.
    pub const STREAM_IV_PREFIX: &[u8] = b"AirPlayStreamIV";
}

/// SHA-512 of `a || b`.
pub fn hash_ab(a: &[u8], b: &[u8]) -> Zeroizing<[u8; 64]> {
    let mut hasher = Sha512::new();
    hasher.update(a);
    hasher.update(b);
    let mut output = Zeroizing::new([0u8; 64]);
    output.copy_from_slice(&hasher.finalize());
    output
}

fn derive_16(label: &[u8], secret: &[u8]) -> Zeroizing<[u8; 16]> {
    truncate::<16>(hash_ab(label, secret).as_slice())
}

/// Key and IV protecting the pair-verify signature exchange.
pub fn derive_pair_verify_key(shared_secret: &SharedSecret) -> AesKeyMaterial {
    let key = derive_16(constants::PAIR_VERIFY_AES_KEY, shared_secret.expose());
    let iv = derive_16(constants::PAIR_VERIFY_AES_IV, shared_secret.expose());
    AesKeyMaterial::new(*key, *iv)
}

/// Key and IV for one media stream.
///
/// `session_key` is the pair-verify shared secret, or the unwrapped legacy AES
/// key when the client used the RSA path.
pub fn derive_stream_key(session_key: &[u8], stream_id: u64) -> AesKeyMaterial {
    let id = stream_id.to_string();
    let key_label = [constants::STREAM_KEY_PREFIX, id.as_bytes()].concat();
    let iv_label = [constants::STREAM_IV_PREFIX, id.as_bytes()].concat();

    let key = derive_16(&key_label, session_key);
    let iv = derive_16(&iv_label, session_key);
    AesKeyMaterial::new(*key, *iv)
}
