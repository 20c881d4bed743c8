//! Media stream keystream.

use std::fmt;

use airplay_crypto::kdf::derive_stream_key;
use airplay_crypto::AesCtrCipher;

/// AES-128-CTR keystream protecting one media stream.
///
/// Frames must be processed in stream order. Partial blocks carry over
/// between frames, so frame boundaries need not align to 16 bytes.
pub struct MediaStreamCipher {
    stream_id: u64,
    cipher: AesCtrCipher,
}

impl MediaStreamCipher {
    /// Derive the stream key from `session_key` and start at keystream position zero.
    pub fn new(session_key: &[u8], stream_id: u64) -> Self {
        let material = derive_stream_key(session_key, stream_id);
        Self {
            stream_id,
            cipher: AesCtrCipher::new(&material),
        }
    }

    /// Decrypt a frame in place.
    pub fn decrypt_frame(&mut self, frame: &mut [u8]) {
        self.cipher.apply_keystream(frame);
    }

    /// Encrypt a frame in place (sender side).
    pub fn encrypt_frame(&mut self, frame: &mut [u8]) {
        self.cipher.apply_keystream(frame);
    }

    /// Keystream bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.cipher.position()
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }
}

impl fmt::Debug for MediaStreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamCipher")
            .field("stream_id", &self.stream_id)
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}
