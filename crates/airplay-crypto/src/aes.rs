//! AES-128 ciphers: CTR keystream for pair-verify and mirroring streams,
//! CBC for legacy RAOP audio.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, StreamCipherSeek,
};
use aes::{Aes128, Block};
use airplay_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

use crate::keys::AesKeyMaterial;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// AES-128-CTR keystream with a 128-bit big-endian counter.
///
/// Encryption and decryption are the same operation. The counter carries
/// partial blocks across calls, so a stream may be processed in pieces of
/// any length as long as they arrive in order.
pub struct AesCtrCipher {
    cipher: Aes128Ctr,
}

impl AesCtrCipher {
    /// Create a cipher at keystream position zero.
    pub fn new(material: &AesKeyMaterial) -> Self {
        let cipher = Aes128Ctr::new(
            GenericArray::from_slice(material.key()),
            GenericArray::from_slice(material.iv()),
        );
        Self { cipher }
    }

    /// XOR `buf` in place with the next `buf.len()` keystream bytes.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }

    /// Number of keystream bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.cipher.current_pos()
    }

    /// Jump to an absolute keystream position.
    pub fn seek(&mut self, position: u64) {
        self.cipher.seek(position);
    }
}

/// AES-128-CBC cipher for legacy AirPlay 1 audio encryption.
#[derive(ZeroizeOnDrop)]
pub struct AesCbcCipher {
    key: [u8; 16],
    #[zeroize(skip)]
    iv: [u8; 16],
}

impl AesCbcCipher {
    /// Create cipher with 16-byte key and IV.
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Create from the key material recovered on the legacy key path.
    pub fn from_material(material: &AesKeyMaterial) -> Self {
        Self::new(*material.key(), *material.iv())
    }

    /// Encrypt plaintext (must be multiple of 16 bytes).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() % 16 != 0 {
            return Err(CryptoError::Encryption(
                "Plaintext must be a multiple of 16 bytes".to_string(),
            ));
        }

        let cipher = Aes128::new(GenericArray::from_slice(&self.key));

        let mut ciphertext = Vec::with_capacity(plaintext.len());
        let mut prev_block = self.iv;

        for chunk in plaintext.chunks(16) {
            let mut block = [0u8; 16];
            for i in 0..16 {
                block[i] = chunk[i] ^ prev_block[i];
            }

            cipher.encrypt_block(Block::from_mut_slice(&mut block));

            prev_block = block;
            ciphertext.extend_from_slice(&block);
        }

        Ok(ciphertext)
    }

    /// Decrypt ciphertext (must be multiple of 16 bytes).
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % 16 != 0 {
            return Err(CryptoError::Decryption(
                "Ciphertext must be a multiple of 16 bytes".to_string(),
            ));
        }

        let mut plaintext = ciphertext.to_vec();
        self.decrypt_blocks_in_place(&mut plaintext);
        Ok(plaintext)
    }

    /// RAOP encryption: only full 16-byte blocks are encrypted, trailing
    /// bytes pass through unencrypted. Every packet starts from the IV
    /// given at construction.
    pub fn encrypt_raop(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let full_len = payload.len() / 16 * 16;

        let mut result = Vec::with_capacity(payload.len());
        result.extend_from_slice(&self.encrypt(&payload[..full_len])?);
        result.extend_from_slice(&payload[full_len..]);

        Ok(result)
    }

    /// RAOP decryption of one audio packet payload, in place.
    ///
    /// Inverse of [`encrypt_raop`](Self::encrypt_raop): whole blocks are
    /// decrypted from the original IV, trailing bytes are left as they are.
    pub fn decrypt_raop(&self, payload: &mut [u8]) {
        let full_len = payload.len() / 16 * 16;
        self.decrypt_blocks_in_place(&mut payload[..full_len]);
    }

    fn decrypt_blocks_in_place(&self, data: &mut [u8]) {
        let cipher = Aes128::new(GenericArray::from_slice(&self.key));
        let mut prev_block = self.iv;

        for chunk in data.chunks_exact_mut(16) {
            let mut saved = [0u8; 16];
            saved.copy_from_slice(chunk);

            cipher.decrypt_block(Block::from_mut_slice(chunk));

            for (byte, prev) in chunk.iter_mut().zip(prev_block.iter()) {
                *byte ^= prev;
            }
            prev_block = saved;
        }
    }
}
