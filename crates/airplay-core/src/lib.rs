//! # airplay-core
//!
//! Error types and configuration shared across the AirPlay receiver crates.
//!
//! This crate provides:
//! - The receiver error taxonomy (pairing, crypto, configuration)
//! - Receiver configuration for identity persistence and the legacy key path

pub mod config;
pub mod error;

pub use config::ReceiverConfig;
pub use error::{ConfigError, CryptoError, Error, PairingError, Result};
