//! Receiver device identity.
//!
//! The `DeviceIdentity` holds the receiver's long-term Ed25519 signing key pair
//! and Curve25519 agreement key pair. It is created once at startup, shared
//! read-only with every connection, and never regenerated while the process
//! runs.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use airplay_core::error::{CryptoError, Result};
use airplay_crypto::keys::SharedSecret;
use airplay_crypto::{AgreementKeyPair, SigningKeyPair};
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

const ED25519_SEED: &str = "ed25519-seed";
const ED25519_PUBLIC: &str = "ed25519-public";
const X25519_SECRET: &str = "x25519-secret";
const X25519_PUBLIC: &str = "x25519-public";

/// The receiver's long-term key pairs.
pub struct DeviceIdentity {
    signing: SigningKeyPair,
    agreement: AgreementKeyPair,
}

impl DeviceIdentity {
    /// Generate both key pairs from the OS random source.
    ///
    /// Either both key pairs are created or an error is returned.
    pub fn generate() -> std::result::Result<Self, CryptoError> {
        let signing = SigningKeyPair::generate()?;
        let agreement = AgreementKeyPair::generate()?;
        Ok(Self { signing, agreement })
    }

    /// Build from stored private halves.
    pub fn from_secrets(ed25519_seed: &[u8; 32], x25519_secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKeyPair::from_seed(ed25519_seed),
            agreement: AgreementKeyPair::from_secret(x25519_secret),
        }
    }

    /// Ed25519 public key advertised to clients.
    pub fn signing_public_key(&self) -> &[u8; 32] {
        self.signing.public_key()
    }

    /// Curve25519 public key sent during pair-verify.
    pub fn agreement_public_key(&self) -> &[u8; 32] {
        self.agreement.public_key()
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message)
    }

    pub(crate) fn agree(
        &self,
        peer_public: &[u8; 32],
    ) -> std::result::Result<SharedSecret, CryptoError> {
        self.agreement.diffie_hellman(peer_public)
    }

    /// Load identity from persistent storage.
    ///
    /// File format: one `name=hex` line per key (`ed25519-seed`,
    /// `ed25519-public`, `x25519-secret`, `x25519-public`). Public keys are
    /// re-derived from the private halves and must match the stored ones.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = Zeroizing::new(std::fs::read_to_string(path)?);
        let identity = Self::parse(&contents)?;
        debug!(path = %path.display(), "Loaded device identity");
        Ok(identity)
    }

    /// Save identity to persistent storage.
    ///
    /// On Unix the file is created with mode `0600`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let seed = self.signing.seed();
        let secret = self.agreement.secret_bytes();
        let contents = Zeroizing::new(format!(
            "{}={}\n{}={}\n{}={}\n{}={}\n",
            ED25519_SEED,
            hex::encode(seed.expose()),
            ED25519_PUBLIC,
            hex::encode(self.signing_public_key()),
            X25519_SECRET,
            hex::encode(secret.expose()),
            X25519_PUBLIC,
            hex::encode(self.agreement_public_key()),
        ));

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        debug!(path = %path.display(), "Saved device identity");
        Ok(())
    }

    /// Load or generate identity.
    ///
    /// If the file exists, load from it. Otherwise, generate a new identity and save it.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate()?;
            identity.save(path)?;
            info!(path = %path.display(), "Generated new device identity");
            Ok(identity)
        }
    }

    fn parse(contents: &str) -> std::result::Result<Self, CryptoError> {
        let mut ed_seed = None;
        let mut ed_public = None;
        let mut x_secret = None;
        let mut x_public = None;

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| store_error("line is not name=value"))?;
            let slot = match name.trim() {
                ED25519_SEED => &mut ed_seed,
                ED25519_PUBLIC => &mut ed_public,
                X25519_SECRET => &mut x_secret,
                X25519_PUBLIC => &mut x_public,
                _ => return Err(store_error("unknown key name")),
            };
            if slot.is_some() {
                return Err(store_error("duplicate key name"));
            }
            *slot = Some(decode_32(value.trim())?);
        }

        let missing = |name: &str| store_error(&format!("missing {}", name));
        let ed_seed = ed_seed.ok_or_else(|| missing(ED25519_SEED))?;
        let ed_public = ed_public.ok_or_else(|| missing(ED25519_PUBLIC))?;
        let x_secret = x_secret.ok_or_else(|| missing(X25519_SECRET))?;
        let x_public = x_public.ok_or_else(|| missing(X25519_PUBLIC))?;

        let identity = Self::from_secrets(&ed_seed, &x_secret);

        let signing_matches = identity.signing_public_key()[..].ct_eq(&ed_public[..]);
        let agreement_matches = identity.agreement_public_key()[..].ct_eq(&x_public[..]);
        if !bool::from(signing_matches & agreement_matches) {
            return Err(store_error("public key does not match private key"));
        }

        Ok(identity)
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("signing_public_key", &hex::encode(self.signing_public_key()))
            .field("agreement_public_key", &hex::encode(self.agreement_public_key()))
            .finish_non_exhaustive()
    }
}

fn store_error(reason: &str) -> CryptoError {
    CryptoError::IdentityStore(reason.to_string())
}

fn decode_32(value: &str) -> std::result::Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(value, out.as_mut_slice())
        .map_err(|_| store_error("value is not 32 bytes of hex"))?;
    Ok(out)
}
