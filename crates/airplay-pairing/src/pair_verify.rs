//! Pair-setup and pair-verify request framing.
//!
//! Pair-setup is a single exchange of Ed25519 public keys with no header.
//! Both pair-verify requests start with a 4-byte header. A non-zero first
//! byte marks the opening request.
//!
//! ```text
//! Setup:   client ed25519 public (32)
//! Reply:   server ed25519 public (32)
//! Start:   header(4) | client curve25519 public (32) | client ed25519 public (32)
//! Reply:   server curve25519 public (32) | encrypted server signature (64)
//! Finish:  header(4) | encrypted client signature (64)
//! Reply:   empty body, status reports verified / not verified
//! ```
//!
//! Signatures are AES-128-CTR encrypted with the key derived from the shared
//! secret. The server's signature uses keystream bytes 0..64 and the client's
//! uses bytes 64..128.

use airplay_core::error::PairingError;
use airplay_crypto::kdf::derive_pair_verify_key;
use airplay_crypto::keys::SharedSecret;
use airplay_crypto::{ed25519, AesCtrCipher};
use tracing::debug;

use crate::identity::DeviceIdentity;
use crate::media::MediaStreamCipher;
use crate::session::ConnectionCryptoSession;

const HEADER_LEN: usize = 4;
const START_HEADER: [u8; HEADER_LEN] = [0x01, 0x00, 0x00, 0x00];
const FINISH_HEADER: [u8; HEADER_LEN] = [0x00, 0x00, 0x00, 0x00];

/// A parsed pair-verify request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerifyRequest<'a> {
    /// Client public keys. Lengths are validated by the session.
    Start {
        agreement_public: &'a [u8],
        signing_public: &'a [u8],
    },
    /// Client's encrypted signature.
    Finish { encrypted_signature: &'a [u8] },
}

impl<'a> PairVerifyRequest<'a> {
    pub fn parse(body: &'a [u8]) -> Result<Self, PairingError> {
        if body.len() < HEADER_LEN {
            return Err(PairingError::InvalidKeyMaterial(
                "pair-verify body is shorter than its header",
            ));
        }
        let (header, payload) = body.split_at(HEADER_LEN);

        if header[0] != 0 {
            let (agreement_public, signing_public) = payload.split_at(payload.len().min(32));
            Ok(Self::Start {
                agreement_public,
                signing_public,
            })
        } else {
            Ok(Self::Finish {
                encrypted_signature: payload,
            })
        }
    }
}

/// Server reply to a pair-verify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairVerifyReply {
    /// Server curve25519 public key followed by the encrypted signature.
    Start(Vec<u8>),
    /// Outcome of client signature verification. The body is empty.
    Finished { verified: bool },
}

impl PairVerifyReply {
    /// Response body to transmit.
    pub fn body(&self) -> &[u8] {
        match self {
            PairVerifyReply::Start(body) => body,
            PairVerifyReply::Finished { .. } => &[],
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        match self {
            PairVerifyReply::Start(_) => true,
            PairVerifyReply::Finished { verified } => *verified,
        }
    }
}

impl ConnectionCryptoSession {
    /// Handle one pair-verify request body.
    ///
    /// The start request runs key acceptance, ECDH, cipher derivation and
    /// signing. The finish request verifies the client's signature.
    pub fn handle_pair_verify(&mut self, body: &[u8]) -> Result<PairVerifyReply, PairingError> {
        match PairVerifyRequest::parse(body)? {
            PairVerifyRequest::Start {
                agreement_public,
                signing_public,
            } => {
                debug!(len = body.len(), "Pair-verify start");
                self.accept_client_public_keys(agreement_public, signing_public)?;
                self.derive_shared_secret()?;
                self.derive_handshake_cipher()?;
                let signature = self.sign()?;

                let mut reply = Vec::with_capacity(32 + signature.len());
                reply.extend_from_slice(self.identity().agreement_public_key());
                reply.extend_from_slice(&signature);
                Ok(PairVerifyReply::Start(reply))
            }
            PairVerifyRequest::Finish {
                encrypted_signature,
            } => {
                debug!(len = body.len(), "Pair-verify finish");
                let verified = self.verify(encrypted_signature);
                Ok(PairVerifyReply::Finished { verified })
            }
        }
    }
}

/// Client side of pair-verify.
///
/// Used to exercise a receiver end to end without a real sender.
pub struct PairVerifyClient {
    identity: DeviceIdentity,
    server_signing_public: Option<[u8; 32]>,
    shared_secret: Option<SharedSecret>,
}

impl PairVerifyClient {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            server_signing_public: None,
            shared_secret: None,
        }
    }

    /// The client's own key pairs.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Build the pair-setup request body.
    pub fn pair_setup_request(&self) -> Vec<u8> {
        self.identity.signing_public_key().to_vec()
    }

    /// Record the receiver's advertised Ed25519 key from the pair-setup reply.
    pub fn process_pair_setup_reply(&mut self, reply: &[u8]) -> Result<(), PairingError> {
        let key = <[u8; 32]>::try_from(reply)
            .map_err(|_| PairingError::InvalidKeyMaterial("pair-setup reply must be 32 bytes"))?;
        self.server_signing_public = Some(key);
        Ok(())
    }

    /// Receiver Ed25519 key learned during pair-setup.
    pub fn server_signing_public(&self) -> Option<&[u8; 32]> {
        self.server_signing_public.as_ref()
    }

    /// Build the start request body.
    pub fn start_request(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + 64);
        body.extend_from_slice(&START_HEADER);
        body.extend_from_slice(self.identity.agreement_public_key());
        body.extend_from_slice(self.identity.signing_public_key());
        body
    }

    /// Check the server's reply and build the finish request body.
    ///
    /// The server signature is verified against the key learned during
    /// pair-setup.
    pub fn process_start_reply(&mut self, reply: &[u8]) -> Result<Vec<u8>, PairingError> {
        let Some(server_signing_public) = self.server_signing_public else {
            return Err(PairingError::InvalidState {
                operation: "process pair-verify reply",
                state: "NoServerKey",
            });
        };
        if reply.len() != 96 {
            return Err(PairingError::InvalidKeyMaterial(
                "pair-verify reply must be 96 bytes",
            ));
        }
        let (server_public, encrypted) = reply.split_at(32);
        let server_public: [u8; 32] = server_public
            .try_into()
            .map_err(|_| PairingError::InvalidKeyMaterial("server curve25519 key must be 32 bytes"))?;

        let shared_secret = self
            .identity
            .agree(&server_public)
            .map_err(|_| PairingError::InvalidKeyMaterial("server curve25519 key is a low-order point"))?;
        let mut cipher = AesCtrCipher::new(&derive_pair_verify_key(&shared_secret));

        let mut server_signature: [u8; 64] = encrypted
            .try_into()
            .map_err(|_| PairingError::InvalidKeyMaterial("server signature must be 64 bytes"))?;
        cipher.apply_keystream(&mut server_signature);

        let client_public = self.identity.agreement_public_key();
        let server_message = [server_public.as_slice(), client_public.as_slice()].concat();
        if !ed25519::verify(&server_signing_public, &server_message, &server_signature) {
            return Err(PairingError::NotAuthenticated);
        }

        let client_message = [client_public.as_slice(), server_public.as_slice()].concat();
        let mut client_signature = self.identity.sign(&client_message);
        cipher.apply_keystream(&mut client_signature);

        self.shared_secret = Some(shared_secret);

        let mut body = Vec::with_capacity(HEADER_LEN + 64);
        body.extend_from_slice(&FINISH_HEADER);
        body.extend_from_slice(&client_signature);
        Ok(body)
    }

    /// Shared secret, after a successful start reply.
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        self.shared_secret.as_ref()
    }

    /// Sender-side cipher for a media stream.
    pub fn media_cipher(&self, stream_id: u64) -> Result<MediaStreamCipher, PairingError> {
        let secret = self
            .shared_secret
            .as_ref()
            .ok_or(PairingError::NotAuthenticated)?;
        Ok(MediaStreamCipher::new(secret.expose(), stream_id))
    }
}
