//! Per-connection crypto session.
//!
//! A `ConnectionCryptoSession` is owned by one accepted connection. It runs
//! either the pair-verify handshake or the legacy RSA key exchange, and once
//! the client is authenticated it keys the media stream and decrypts frames.
//!
//! ```text
//! Idle ──accept_client_public_keys──▶ KeysReceived ──verify──▶ Verified
//!   │                                      │
//!   └──accept_legacy_key──▶ LegacyKeyAccepted                 └──▶ Failed
//! ```

use std::fmt;
use std::sync::Arc;

use airplay_core::error::PairingError;
use airplay_crypto::kdf::derive_pair_verify_key;
use airplay_crypto::keys::{AesKeyMaterial, SharedSecret};
use airplay_crypto::{ed25519, AesCbcCipher, AesCtrCipher, LegacyKeyUnwrapper};
use tracing::{debug, info, warn};

use crate::identity::DeviceIdentity;
use crate::media::MediaStreamCipher;

type Result<T> = std::result::Result<T, PairingError>;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    KeysReceived,
    Verified,
    LegacyKeyAccepted,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::KeysReceived => "KeysReceived",
            SessionState::Verified => "Verified",
            SessionState::LegacyKeyAccepted => "LegacyKeyAccepted",
            SessionState::Failed => "Failed",
        }
    }

    /// Whether media may be keyed in this state.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Verified | SessionState::LegacyKeyAccepted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-progress pair-verify handshake.
struct Handshake {
    client_agreement_public: [u8; 32],
    client_signing_public: [u8; 32],
    shared_secret: Option<SharedSecret>,
    cipher: Option<AesCtrCipher>,
    signed: bool,
}

enum Phase {
    Idle,
    KeysReceived(Handshake),
    Verified(SharedSecret),
    Legacy(AesKeyMaterial),
    Failed,
}

/// Crypto state for one client connection.
pub struct ConnectionCryptoSession {
    identity: Arc<DeviceIdentity>,
    legacy: Option<Arc<LegacyKeyUnwrapper>>,
    setup_client_signing_public: Option<[u8; 32]>,
    phase: Phase,
    media: Option<MediaStreamCipher>,
}

impl ConnectionCryptoSession {
    /// Create a session for a new connection.
    pub fn new(identity: Arc<DeviceIdentity>) -> Self {
        Self {
            identity,
            legacy: None,
            setup_client_signing_public: None,
            phase: Phase::Idle,
            media: None,
        }
    }

    /// Enable the legacy RSA key path for this session.
    pub fn with_legacy_unwrapper(mut self, unwrapper: Arc<LegacyKeyUnwrapper>) -> Self {
        self.legacy = Some(unwrapper);
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Idle => SessionState::Idle,
            Phase::KeysReceived(_) => SessionState::KeysReceived,
            Phase::Verified(_) => SessionState::Verified,
            Phase::Legacy(_) => SessionState::LegacyKeyAccepted,
            Phase::Failed => SessionState::Failed,
        }
    }

    /// The receiver identity this session signs with.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The ECDH shared secret, once derived.
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        match &self.phase {
            Phase::KeysReceived(handshake) => handshake.shared_secret.as_ref(),
            Phase::Verified(secret) => Some(secret),
            _ => None,
        }
    }

    fn invalid_state(&self, operation: &'static str) -> PairingError {
        PairingError::InvalidState {
            operation,
            state: self.state().as_str(),
        }
    }

    fn fail(&mut self, err: PairingError) -> PairingError {
        warn!(state = %self.state(), error = %err, "Crypto session failed");
        self.phase = Phase::Failed;
        self.media = None;
        err
    }

    // ========================================================================
    // Pair-setup (signing key advertisement)
    // ========================================================================

    /// Handle a pair-setup request body and return the reply body.
    ///
    /// A 32-byte body is the client's Ed25519 public key and is recorded.
    /// Other bodies are ignored. The reply is always the receiver's Ed25519
    /// public key, which the client checks the pair-verify signature against.
    /// The session state is not changed.
    pub fn handle_pair_setup(&mut self, body: &[u8]) -> Vec<u8> {
        match <[u8; 32]>::try_from(body) {
            Ok(client_signing_public) => {
                self.setup_client_signing_public = Some(client_signing_public);
                debug!("Pair-setup client key recorded");
            }
            Err(_) => debug!(len = body.len(), "Pair-setup body ignored"),
        }
        self.identity.signing_public_key().to_vec()
    }

    /// Client Ed25519 key received during pair-setup, if any.
    pub fn pair_setup_client_key(&self) -> Option<&[u8; 32]> {
        self.setup_client_signing_public.as_ref()
    }

    // ========================================================================
    // Legacy key path (RSA-wrapped AES key)
    // ========================================================================

    /// Unwrap the AES key a legacy client encrypted to the receiver's RSA key.
    ///
    /// Only allowed before any other key exchange has started.
    pub fn accept_legacy_key(&mut self, encrypted_key: &[u8], iv: &[u8]) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.invalid_state("accept legacy key"));
        }

        let Some(unwrapper) = self.legacy.clone() else {
            return Err(self.fail(PairingError::InvalidKeyMaterial(
                "legacy key path is not configured",
            )));
        };

        let key = match unwrapper.unwrap_key(encrypted_key) {
            Ok(key) => key,
            Err(_) => {
                return Err(self.fail(PairingError::InvalidKeyMaterial(
                    "legacy AES key could not be unwrapped",
                )))
            }
        };
        if key.len() != 16 {
            return Err(self.fail(PairingError::InvalidKeyMaterial(
                "legacy AES key must be 16 bytes",
            )));
        }
        if iv.len() != 16 {
            return Err(self.fail(PairingError::InvalidKeyMaterial(
                "legacy AES IV must be 16 bytes",
            )));
        }

        let material = match AesKeyMaterial::from_slices(&key, iv) {
            Ok(material) => material,
            Err(_) => {
                return Err(self.fail(PairingError::InvalidKeyMaterial(
                    "legacy AES key material is malformed",
                )))
            }
        };

        self.phase = Phase::Legacy(material);
        info!("Legacy AES key accepted");
        Ok(())
    }

    /// AES-128-CBC cipher for RAOP audio packets on the legacy path.
    pub fn legacy_audio_cipher(&self) -> Result<AesCbcCipher> {
        match &self.phase {
            Phase::Legacy(material) => Ok(AesCbcCipher::from_material(material)),
            _ => Err(PairingError::NotAuthenticated),
        }
    }

    // ========================================================================
    // Pair-verify handshake
    // ========================================================================

    /// Store the client's Curve25519 and Ed25519 public keys.
    pub fn accept_client_public_keys(
        &mut self,
        agreement_public: &[u8],
        signing_public: &[u8],
    ) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.invalid_state("accept client public keys"));
        }

        let Ok(client_agreement_public) = <[u8; 32]>::try_from(agreement_public) else {
            return Err(self.fail(PairingError::InvalidKeyMaterial(
                "client curve25519 key must be 32 bytes",
            )));
        };
        let Ok(client_signing_public) = <[u8; 32]>::try_from(signing_public) else {
            return Err(self.fail(PairingError::InvalidKeyMaterial(
                "client ed25519 key must be 32 bytes",
            )));
        };

        self.phase = Phase::KeysReceived(Handshake {
            client_agreement_public,
            client_signing_public,
            shared_secret: None,
            cipher: None,
            signed: false,
        });
        debug!("Client public keys received");
        Ok(())
    }

    /// Run X25519 between the receiver's agreement key and the client's.
    ///
    /// Computed once per session.
    pub fn derive_shared_secret(&mut self) -> Result<()> {
        let client_public = match &self.phase {
            Phase::KeysReceived(handshake) if handshake.shared_secret.is_none() => {
                handshake.client_agreement_public
            }
            _ => return Err(self.invalid_state("derive shared secret")),
        };

        let secret = match self.identity.agree(&client_public) {
            Ok(secret) => secret,
            Err(_) => {
                return Err(self.fail(PairingError::InvalidKeyMaterial(
                    "client curve25519 key is a low-order point",
                )))
            }
        };

        if let Phase::KeysReceived(handshake) = &mut self.phase {
            handshake.shared_secret = Some(secret);
        }
        debug!("Shared secret derived");
        Ok(())
    }

    /// Key the AES-128-CTR cipher that protects the signature exchange.
    pub fn derive_handshake_cipher(&mut self) -> Result<()> {
        if let Phase::KeysReceived(Handshake {
            shared_secret: Some(secret),
            cipher,
            ..
        }) = &mut self.phase
        {
            if cipher.is_none() {
                *cipher = Some(AesCtrCipher::new(&derive_pair_verify_key(secret)));
                debug!("Handshake cipher derived");
                return Ok(());
            }
        }
        Err(self.invalid_state("derive handshake cipher"))
    }

    /// Sign `server_curve_public || client_curve_public` and encrypt the
    /// signature with keystream bytes 0..64.
    pub fn sign(&mut self) -> Result<Vec<u8>> {
        let server_public = *self.identity.agreement_public_key();
        let state = self.state().as_str();

        let handshake = match &mut self.phase {
            Phase::Idle => return Err(PairingError::NotAuthenticated),
            Phase::KeysReceived(handshake) => handshake,
            _ => {
                return Err(PairingError::InvalidState {
                    operation: "sign",
                    state,
                })
            }
        };
        if handshake.signed {
            return Err(PairingError::InvalidState {
                operation: "sign",
                state,
            });
        }
        let Some(cipher) = handshake.cipher.as_mut() else {
            return Err(PairingError::NotAuthenticated);
        };

        let mut message = [0u8; 64];
        message[..32].copy_from_slice(&server_public);
        message[32..].copy_from_slice(&handshake.client_agreement_public);

        let mut signature = self.identity.sign(&message);
        cipher.apply_keystream(&mut signature);
        handshake.signed = true;

        debug!("Server signature produced");
        Ok(signature.to_vec())
    }

    /// Decrypt and check the client's signature.
    ///
    /// Returns `false` on any failure. A pending handshake moves to `Failed`;
    /// success moves to `Verified` and drops the handshake cipher.
    pub fn verify(&mut self, encrypted_signature: &[u8]) -> bool {
        let phase = std::mem::replace(&mut self.phase, Phase::Failed);

        let handshake = match phase {
            Phase::KeysReceived(handshake) => handshake,
            other => {
                // Nothing pending to fail.
                self.phase = other;
                warn!(state = %self.state(), "Verify called with no pending handshake");
                return false;
            }
        };

        match Self::check_client_signature(&self.identity, handshake, encrypted_signature) {
            Some(secret) => {
                self.phase = Phase::Verified(secret);
                info!("Pair-verify complete");
                true
            }
            None => {
                warn!(
                    len = encrypted_signature.len(),
                    "Client signature rejected"
                );
                self.media = None;
                false
            }
        }
    }

    fn check_client_signature(
        identity: &DeviceIdentity,
        handshake: Handshake,
        encrypted_signature: &[u8],
    ) -> Option<SharedSecret> {
        let Handshake {
            client_agreement_public,
            client_signing_public,
            shared_secret,
            cipher,
            signed,
        } = handshake;

        if !signed {
            return None;
        }
        let mut cipher = cipher?;
        let mut signature = <[u8; 64]>::try_from(encrypted_signature).ok()?;
        cipher.apply_keystream(&mut signature);

        let mut message = [0u8; 64];
        message[..32].copy_from_slice(&client_agreement_public);
        message[32..].copy_from_slice(identity.agreement_public_key());

        if ed25519::verify(&client_signing_public, &message, &signature) {
            shared_secret
        } else {
            None
        }
    }

    // ========================================================================
    // Media stream
    // ========================================================================

    /// Key a new media stream, replacing any previous one.
    pub fn begin_media_stream(&mut self, stream_id: u64) -> Result<()> {
        let cipher = match &self.phase {
            Phase::Verified(secret) => MediaStreamCipher::new(secret.expose(), stream_id),
            Phase::Legacy(material) => MediaStreamCipher::new(material.key(), stream_id),
            _ => return Err(PairingError::NotAuthenticated),
        };

        if let Some(previous) = self.media.replace(cipher) {
            debug!(
                stream_id = previous.stream_id(),
                position = previous.position(),
                "Replacing media stream"
            );
        }
        info!(stream_id, "Media stream keyed");
        Ok(())
    }

    /// Decrypt one media frame in place.
    ///
    /// Frames must arrive in stream order. The buffer is untouched on error.
    pub fn decrypt_frame(&mut self, frame: &mut [u8]) -> Result<()> {
        let media = self
            .media
            .as_mut()
            .ok_or(PairingError::StreamNotInitialized)?;
        media.decrypt_frame(frame);
        Ok(())
    }

    /// Keystream bytes consumed by the current media stream.
    pub fn media_stream_position(&self) -> Option<u64> {
        self.media.as_ref().map(MediaStreamCipher::position)
    }
}

impl fmt::Debug for ConnectionCryptoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCryptoSession")
            .field("state", &self.state())
            .field("legacy_enabled", &self.legacy.is_some())
            .field("pair_setup", &self.setup_client_signing_public.is_some())
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pair_verify::PairVerifyClient;

    fn server() -> ConnectionCryptoSession {
        ConnectionCryptoSession::new(Arc::new(DeviceIdentity::generate().unwrap()))
    }

    fn client() -> PairVerifyClient {
        PairVerifyClient::new(DeviceIdentity::generate().unwrap())
    }

    /// Runs steps 1-4 and returns the encrypted server signature.
    fn start_handshake(session: &mut ConnectionCryptoSession, client: &PairVerifyClient) -> Vec<u8> {
        session
            .accept_client_public_keys(
                client.identity().agreement_public_key(),
                client.identity().signing_public_key(),
            )
            .unwrap();
        session.derive_shared_secret().unwrap();
        session.derive_handshake_cipher().unwrap();
        session.sign().unwrap()
    }

    /// Feeds the server signature back to the client and returns its
    /// encrypted signature, without the request header.
    fn client_signature(
        session: &mut ConnectionCryptoSession,
        client: &mut PairVerifyClient,
        server_signature: &[u8],
    ) -> Vec<u8> {
        let setup_reply = session.handle_pair_setup(&client.pair_setup_request());
        client.process_pair_setup_reply(&setup_reply).unwrap();

        let reply = [
            session.identity().agreement_public_key().as_slice(),
            server_signature,
        ]
        .concat();
        client.process_start_reply(&reply).unwrap().split_off(4)
    }

    /// Signs `message` as the client and encrypts it at keystream offset 64.
    fn encrypt_client_signature(
        session: &ConnectionCryptoSession,
        client: &PairVerifyClient,
        message: &[u8],
    ) -> [u8; 64] {
        let secret = session.shared_secret().unwrap().clone();
        let mut cipher = AesCtrCipher::new(&derive_pair_verify_key(&secret));
        cipher.seek(64);
        let mut signature = client.identity().sign(message);
        cipher.apply_keystream(&mut signature);
        signature
    }

    fn verified_pair() -> (ConnectionCryptoSession, PairVerifyClient) {
        let mut session = server();
        let mut client = client();
        let signature = start_handshake(&mut session, &client);
        let finish = client_signature(&mut session, &mut client, &signature);
        assert!(session.verify(&finish));
        (session, client)
    }

    mod state {
        use super::*;

        #[test]
        fn starts_idle() {
            let session = server();
            assert_eq!(session.state(), SessionState::Idle);
            assert!(session.shared_secret().is_none());
            assert!(session.media_stream_position().is_none());
        }

        #[test]
        fn state_names() {
            assert_eq!(SessionState::KeysReceived.to_string(), "KeysReceived");
            assert!(SessionState::Verified.is_authenticated());
            assert!(SessionState::LegacyKeyAccepted.is_authenticated());
            assert!(!SessionState::Failed.is_authenticated());
        }

        #[test]
        fn session_is_send() {
            fn assert_send<T: Send>() {}
            assert_send::<ConnectionCryptoSession>();
        }
    }

    mod pair_setup {
        use super::*;

        #[test]
        fn records_client_key_without_changing_state() {
            let mut session = server();
            let reply = session.handle_pair_setup(&[0x5Au8; 32]);
            assert_eq!(reply.as_slice(), session.identity().signing_public_key());
            assert_eq!(session.pair_setup_client_key(), Some(&[0x5Au8; 32]));
            assert_eq!(session.state(), SessionState::Idle);
        }

        #[test]
        fn allowed_after_verification() {
            let (mut session, _client) = verified_pair();
            session.handle_pair_setup(&[0x5Au8; 32]);
            assert_eq!(session.state(), SessionState::Verified);
        }
    }

    mod client_keys {
        use super::*;

        #[test]
        fn accepts_32_byte_keys() {
            let mut session = server();
            session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap();
            assert_eq!(session.state(), SessionState::KeysReceived);
        }

        #[test]
        fn bad_curve_key_length_fails_session() {
            let mut session = server();
            let err = session
                .accept_client_public_keys(&[9u8; 31], &[7u8; 32])
                .unwrap_err();
            assert!(matches!(err, PairingError::InvalidKeyMaterial(_)));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn bad_signing_key_length_fails_session() {
            let mut session = server();
            let err = session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 33])
                .unwrap_err();
            assert!(matches!(err, PairingError::InvalidKeyMaterial(_)));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn second_call_is_invalid_state() {
            let mut session = server();
            session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap();
            let err = session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap_err();
            assert_eq!(
                err,
                PairingError::InvalidState {
                    operation: "accept client public keys",
                    state: "KeysReceived",
                }
            );
        }
    }

    mod shared_secret {
        use super::*;

        #[test]
        fn matches_client_side_agreement() {
            let mut session = server();
            let client = client();
            session
                .accept_client_public_keys(
                    client.identity().agreement_public_key(),
                    client.identity().signing_public_key(),
                )
                .unwrap();
            session.derive_shared_secret().unwrap();

            let expected = client
                .identity()
                .agree(session.identity().agreement_public_key())
                .unwrap();
            assert_eq!(session.shared_secret(), Some(&expected));
        }

        #[test]
        fn computed_once() {
            let mut session = server();
            let client = client();
            session
                .accept_client_public_keys(
                    client.identity().agreement_public_key(),
                    client.identity().signing_public_key(),
                )
                .unwrap();
            session.derive_shared_secret().unwrap();
            assert!(matches!(
                session.derive_shared_secret(),
                Err(PairingError::InvalidState { .. })
            ));
        }

        #[test]
        fn rejects_low_order_client_key() {
            let mut session = server();
            session
                .accept_client_public_keys(&[0u8; 32], &[7u8; 32])
                .unwrap();
            assert!(matches!(
                session.derive_shared_secret(),
                Err(PairingError::InvalidKeyMaterial(_))
            ));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn requires_client_keys() {
            let mut session = server();
            assert!(matches!(
                session.derive_shared_secret(),
                Err(PairingError::InvalidState { .. })
            ));
        }
    }

    mod signing {
        use super::*;

        #[test]
        fn sign_before_keys_is_not_authenticated() {
            let mut session = server();
            assert_eq!(session.sign(), Err(PairingError::NotAuthenticated));
        }

        #[test]
        fn sign_before_cipher_is_not_authenticated() {
            let mut session = server();
            let client = client();
            session
                .accept_client_public_keys(
                    client.identity().agreement_public_key(),
                    client.identity().signing_public_key(),
                )
                .unwrap();
            session.derive_shared_secret().unwrap();
            assert_eq!(session.sign(), Err(PairingError::NotAuthenticated));
        }

        #[test]
        fn cipher_requires_shared_secret() {
            let mut session = server();
            session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap();
            assert!(matches!(
                session.derive_handshake_cipher(),
                Err(PairingError::InvalidState { .. })
            ));
        }

        #[test]
        fn signature_is_encrypted_with_handshake_keystream() {
            let mut session = server();
            let client = client();
            let encrypted = start_handshake(&mut session, &client);
            assert_eq!(encrypted.len(), 64);

            let secret = session.shared_secret().unwrap().clone();
            let mut cipher = AesCtrCipher::new(&derive_pair_verify_key(&secret));
            let mut signature: [u8; 64] = encrypted.try_into().unwrap();
            cipher.apply_keystream(&mut signature);

            let mut message = Vec::new();
            message.extend_from_slice(session.identity().agreement_public_key());
            message.extend_from_slice(client.identity().agreement_public_key());
            assert!(ed25519::verify(
                session.identity().signing_public_key(),
                &message,
                &signature
            ));
        }

        #[test]
        fn sign_only_once() {
            let mut session = server();
            let client = client();
            start_handshake(&mut session, &client);
            assert!(matches!(
                session.sign(),
                Err(PairingError::InvalidState { .. })
            ));
        }
    }

    mod verification {
        use super::*;

        #[test]
        fn correct_client_signature_verifies() {
            let (session, client) = verified_pair();
            assert_eq!(session.state(), SessionState::Verified);
            assert_eq!(session.shared_secret(), client.shared_secret());
        }

        #[test]
        fn flipped_signature_byte_fails() {
            for index in [0usize, 31, 63] {
                let mut session = server();
                let mut client = client();
                let signature = start_handshake(&mut session, &client);
                let mut finish = client_signature(&mut session, &mut client, &signature);

                finish[index] ^= 0x80;
                assert!(!session.verify(&finish));
                assert_eq!(session.state(), SessionState::Failed);
            }
        }

        #[test]
        fn correctly_encrypted_payload_verifies() {
            let mut session = server();
            let client = client();
            start_handshake(&mut session, &client);

            let mut message = Vec::new();
            message.extend_from_slice(client.identity().agreement_public_key());
            message.extend_from_slice(session.identity().agreement_public_key());
            let signature = encrypt_client_signature(&session, &client, &message);

            assert!(session.verify(&signature));
            assert_eq!(session.state(), SessionState::Verified);
        }

        #[test]
        fn flipped_payload_byte_fails() {
            for index in [0usize, 5, 32, 63] {
                let mut session = server();
                let client = client();
                start_handshake(&mut session, &client);

                let mut message = Vec::new();
                message.extend_from_slice(client.identity().agreement_public_key());
                message.extend_from_slice(session.identity().agreement_public_key());
                message[index] ^= 0x01;
                let signature = encrypt_client_signature(&session, &client, &message);

                assert!(!session.verify(&signature), "payload byte {}", index);
                assert_eq!(session.state(), SessionState::Failed);
            }
        }

        #[test]
        fn swapped_payload_order_fails() {
            let mut session = server();
            let client = client();
            start_handshake(&mut session, &client);

            let mut message = Vec::new();
            message.extend_from_slice(session.identity().agreement_public_key());
            message.extend_from_slice(client.identity().agreement_public_key());
            let signature = encrypt_client_signature(&session, &client, &message);

            assert!(!session.verify(&signature));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn wrong_length_fails() {
            let mut session = server();
            let client = client();
            start_handshake(&mut session, &client);
            assert!(!session.verify(&[0u8; 63]));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn signature_from_other_identity_fails() {
            let mut session = server();
            let client = client();
            start_handshake(&mut session, &client);

            // Right keystream, wrong signer.
            let impostor = PairVerifyClient::new(DeviceIdentity::generate().unwrap());
            let mut message = Vec::new();
            message.extend_from_slice(client.identity().agreement_public_key());
            message.extend_from_slice(session.identity().agreement_public_key());
            let signature = encrypt_client_signature(&session, &impostor, &message);

            assert!(!session.verify(&signature));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn verify_before_sign_fails_pending_handshake() {
            let mut session = server();
            session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap();
            assert!(!session.verify(&[0u8; 64]));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn verify_when_idle_returns_false() {
            let mut session = server();
            assert!(!session.verify(&[0u8; 64]));
            assert_eq!(session.state(), SessionState::Idle);
        }

        #[test]
        fn verify_after_verified_keeps_session() {
            let (mut session, _client) = verified_pair();
            assert!(!session.verify(&[0u8; 64]));
            assert_eq!(session.state(), SessionState::Verified);
        }
    }

    mod media {
        use super::*;

        #[test]
        fn decrypt_before_begin_leaves_buffer_untouched() {
            let (mut session, _client) = verified_pair();
            let mut frame = [0xAAu8; 32];
            assert_eq!(
                session.decrypt_frame(&mut frame),
                Err(PairingError::StreamNotInitialized)
            );
            assert_eq!(frame, [0xAAu8; 32]);
        }

        #[test]
        fn begin_requires_authentication() {
            let mut session = server();
            assert_eq!(
                session.begin_media_stream(1),
                Err(PairingError::NotAuthenticated)
            );

            let client = client();
            start_handshake(&mut session, &client);
            assert_eq!(
                session.begin_media_stream(1),
                Err(PairingError::NotAuthenticated)
            );
        }

        #[test]
        fn frames_decrypt_in_order() {
            let (mut session, client) = verified_pair();
            session.begin_media_stream(42).unwrap();
            let mut sender = client.media_cipher(42).unwrap();

            for len in [1usize, 16, 17, 1500] {
                let plaintext = vec![0x5Cu8; len];
                let mut frame = plaintext.clone();
                sender.encrypt_frame(&mut frame);
                session.decrypt_frame(&mut frame).unwrap();
                assert_eq!(frame, plaintext);
            }
            assert_eq!(session.media_stream_position(), Some(1534));
        }

        #[test]
        fn new_stream_resets_keystream() {
            let (mut session, client) = verified_pair();
            session.begin_media_stream(1).unwrap();
            let mut frame = [0u8; 100];
            session.decrypt_frame(&mut frame).unwrap();

            session.begin_media_stream(2).unwrap();
            assert_eq!(session.media_stream_position(), Some(0));

            let mut sender = client.media_cipher(2).unwrap();
            let mut frame = *b"second stream payload";
            sender.encrypt_frame(&mut frame);
            session.decrypt_frame(&mut frame).unwrap();
            assert_eq!(&frame, b"second stream payload");
        }
    }

    mod legacy {
        use super::*;
        use rsa::{Oaep, RsaPrivateKey};
        use std::sync::OnceLock;

        fn unwrapper() -> Arc<LegacyKeyUnwrapper> {
            static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
            let key = KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());
            Arc::new(LegacyKeyUnwrapper::new(key.clone()))
        }

        fn wrap(unwrapper: &LegacyKeyUnwrapper, key: &[u8]) -> Vec<u8> {
            unwrapper
                .public_key()
                .encrypt(&mut rand::thread_rng(), Oaep::new::<sha1::Sha1>(), key)
                .unwrap()
        }

        fn legacy_session() -> (ConnectionCryptoSession, Arc<LegacyKeyUnwrapper>) {
            let unwrapper = unwrapper();
            (server().with_legacy_unwrapper(unwrapper.clone()), unwrapper)
        }

        #[test]
        fn accepts_wrapped_key() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            session.accept_legacy_key(&wrapped, &[0x22u8; 16]).unwrap();
            assert_eq!(session.state(), SessionState::LegacyKeyAccepted);
        }

        #[test]
        fn legacy_audio_cipher_uses_unwrapped_key() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            session.accept_legacy_key(&wrapped, &[0x22u8; 16]).unwrap();

            let sender = AesCbcCipher::new([0x11u8; 16], [0x22u8; 16]);
            let packet = vec![0x33u8; 37];
            let mut encrypted = sender.encrypt_raop(&packet).unwrap();

            session.legacy_audio_cipher().unwrap().decrypt_raop(&mut encrypted);
            assert_eq!(encrypted, packet);
        }

        #[test]
        fn legacy_key_keys_media_stream() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            session.accept_legacy_key(&wrapped, &[0x22u8; 16]).unwrap();
            session.begin_media_stream(5).unwrap();

            let mut sender = MediaStreamCipher::new(&[0x11u8; 16], 5);
            let mut frame = *b"legacy mirrored frame";
            sender.encrypt_frame(&mut frame);
            session.decrypt_frame(&mut frame).unwrap();
            assert_eq!(&frame, b"legacy mirrored frame");
        }

        #[test]
        fn rejects_wrong_key_length() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 24]);
            assert!(matches!(
                session.accept_legacy_key(&wrapped, &[0x22u8; 16]),
                Err(PairingError::InvalidKeyMaterial(_))
            ));
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn rejects_wrong_iv_length() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            assert!(session.accept_legacy_key(&wrapped, &[0x22u8; 8]).is_err());
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn rejects_undecryptable_blob() {
            let (mut session, _unwrapper) = legacy_session();
            assert!(session.accept_legacy_key(&[0u8; 128], &[0x22u8; 16]).is_err());
            assert_eq!(session.state(), SessionState::Failed);
        }

        #[test]
        fn requires_configured_unwrapper() {
            let mut session = server();
            assert!(matches!(
                session.accept_legacy_key(&[0u8; 128], &[0u8; 16]),
                Err(PairingError::InvalidKeyMaterial(_))
            ));
        }

        #[test]
        fn paths_are_mutually_exclusive() {
            let (mut session, unwrapper) = legacy_session();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            session.accept_legacy_key(&wrapped, &[0x22u8; 16]).unwrap();
            assert!(matches!(
                session.accept_client_public_keys(&[9u8; 32], &[7u8; 32]),
                Err(PairingError::InvalidState { .. })
            ));
            assert_eq!(session.state(), SessionState::LegacyKeyAccepted);

            let (mut session, unwrapper) = legacy_session();
            session
                .accept_client_public_keys(&[9u8; 32], &[7u8; 32])
                .unwrap();
            let wrapped = wrap(&unwrapper, &[0x11u8; 16]);
            assert!(matches!(
                session.accept_legacy_key(&wrapped, &[0x22u8; 16]),
                Err(PairingError::InvalidState { .. })
            ));
            assert_eq!(session.state(), SessionState::KeysReceived);
        }

        #[test]
        fn audio_cipher_requires_legacy_path() {
            let (session, _client) = verified_pair();
            assert!(matches!(
                session.legacy_audio_cipher(),
                Err(PairingError::NotAuthenticated)
            ));
        }
    }
}
