//! Receiver configuration.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable naming the persisted identity file.
pub const IDENTITY_PATH_ENV: &str = "AIRPLAY_IDENTITY_PATH";

/// Environment variable naming the legacy RSA private key (PEM).
pub const RSA_KEY_PATH_ENV: &str = "AIRPLAY_RSA_KEY_PATH";

/// Configuration for the receiver's key material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Where the device identity is persisted. `None` keeps it in memory only.
    pub identity_path: Option<PathBuf>,
    /// PEM file holding the RSA key used by legacy clients. `None` disables
    /// the legacy key path.
    pub legacy_rsa_key_path: Option<PathBuf>,
    /// Enable debug logging.
    pub debug: bool,
}

impl ReceiverConfig {
    /// Create a configuration with everything disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from `AIRPLAY_IDENTITY_PATH` / `AIRPLAY_RSA_KEY_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };
        Self {
            identity_path: path(IDENTITY_PATH_ENV),
            legacy_rsa_key_path: path(RSA_KEY_PATH_ENV),
            debug: false,
        }
    }

    /// Persist the identity at `path`.
    pub fn identity_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_path = Some(path.into());
        self
    }

    /// Load the legacy RSA key from `path`.
    pub fn legacy_rsa_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_rsa_key_path = Some(path.into());
        self
    }

    /// Enable or disable debug logging.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Check that configured input files exist.
    ///
    /// The identity file is allowed to be missing; it is created on first run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.legacy_rsa_key_path {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
        }
        Ok(())
    }

    /// Whether the legacy key path is enabled.
    pub fn legacy_enabled(&self) -> bool {
        self.legacy_rsa_key_path.is_some()
    }

    /// The identity path, if persistence is enabled.
    pub fn identity_file(&self) -> Option<&Path> {
        self.identity_path.as_deref()
    }
}
