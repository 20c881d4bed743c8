//! AirPlay receiver key tool.
//!
//! Loads (or creates) the receiver's device identity, reports its public
//! keys, and can run a loopback pair-verify self-test.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use airplay_core::{ConfigError, ReceiverConfig};
use airplay_crypto::LegacyKeyUnwrapper;
use airplay_pairing::{
    ConnectionCryptoSession, DeviceIdentity, PairVerifyClient, PairVerifyReply, SessionState,
};
use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Debug, Default)]
struct Args {
    /// Identity file (overrides AIRPLAY_IDENTITY_PATH)
    identity: Option<PathBuf>,
    /// Legacy RSA key PEM (overrides AIRPLAY_RSA_KEY_PATH)
    rsa_key: Option<PathBuf>,
    /// Enable debug logging
    debug: bool,
    /// Run a loopback handshake after loading keys
    self_test: bool,
}

fn parse_args() -> Result<Args, ConfigError> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from(argv: impl IntoIterator<Item = String>) -> Result<Args, ConfigError> {
    let mut args = Args::default();
    let mut iter = argv.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--identity" | "-i" => {
                let path = iter.next().ok_or(ConfigError::MissingValue("--identity"))?;
                args.identity = Some(PathBuf::from(path));
            }
            "--rsa-key" | "-k" => {
                let path = iter.next().ok_or(ConfigError::MissingValue("--rsa-key"))?;
                args.rsa_key = Some(PathBuf::from(path));
            }
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--self-test" | "-t" => {
                args.self_test = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    Ok(args)
}

fn print_help() {
    println!("airplay-receiver-keys - AirPlay receiver identity and pairing keys");
    println!();
    println!("Usage: airplay-receiver-keys [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -i, --identity PATH  Load or create the device identity at PATH");
    println!("  -k, --rsa-key PATH   Enable the legacy key path with this RSA PEM");
    println!("  -d, --debug          Enable debug logging");
    println!("  -t, --self-test      Run a loopback pair-verify and media check");
    println!("  -h, --help           Show this help message");
    println!();
    println!("Environment:");
    println!("  AIRPLAY_IDENTITY_PATH, AIRPLAY_RSA_KEY_PATH  Defaults for the paths above");
    println!("  RUST_LOG                                   Log filter (default: info)");
}

fn setup_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn build_config(args: &Args) -> ReceiverConfig {
    let mut config = ReceiverConfig::from_env().debug(args.debug);
    if let Some(path) = &args.identity {
        config = config.identity_path(path);
    }
    if let Some(path) = &args.rsa_key {
        config = config.legacy_rsa_key_path(path);
    }
    config
}

fn load_identity(path: Option<&Path>) -> Result<DeviceIdentity> {
    match path {
        Some(path) => DeviceIdentity::load_or_generate(path)
            .with_context(|| format!("Failed to load device identity from {}", path.display())),
        None => {
            info!("No identity path configured, using an ephemeral identity");
            DeviceIdentity::generate().context("Failed to generate device identity")
        }
    }
}

/// Pair a simulated sender with this receiver and push frames through a
/// media stream.
fn run_self_test(
    identity: Arc<DeviceIdentity>,
    legacy: Option<Arc<LegacyKeyUnwrapper>>,
) -> Result<()> {
    let mut session = ConnectionCryptoSession::new(identity.clone());
    if let Some(unwrapper) = legacy {
        session = session.with_legacy_unwrapper(unwrapper);
    }
    let mut client = PairVerifyClient::new(DeviceIdentity::generate()?);

    let advertised = session.handle_pair_setup(&client.pair_setup_request());
    client.process_pair_setup_reply(&advertised)?;
    if advertised.as_slice() != identity.signing_public_key() {
        bail!("Self-test pair-setup advertised the wrong signing key");
    }

    let reply = session.handle_pair_verify(&client.start_request())?;
    let finish = client.process_start_reply(reply.body())?;
    let reply = session.handle_pair_verify(&finish)?;
    if reply != (PairVerifyReply::Finished { verified: true }) {
        bail!("Self-test client signature was not verified");
    }
    if session.state() != SessionState::Verified {
        bail!("Self-test session ended in state {}", session.state());
    }

    let stream_id = 1;
    session.begin_media_stream(stream_id)?;
    let mut sender = client.media_cipher(stream_id)?;

    for len in [1usize, 16, 17, 1500] {
        let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let mut frame = plaintext.clone();
        sender.encrypt_frame(&mut frame);
        session.decrypt_frame(&mut frame)?;
        if frame != plaintext {
            bail!("Self-test frame of {} bytes did not decrypt", len);
        }
        debug!(len, "Self-test frame decrypted");
    }

    info!(
        position = session.media_stream_position().unwrap_or(0),
        "Self-test passed"
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{}", err);
            print_help();
            std::process::exit(1);
        }
    };

    // Setup logging before anything else
    setup_logging(args.debug);

    let config = build_config(&args);
    config.validate().context("Invalid configuration")?;
    debug!(?config, "Configuration loaded");

    let identity = Arc::new(load_identity(config.identity_file())?);
    let signing_public = hex::encode(identity.signing_public_key());
    let agreement_public = hex::encode(identity.agreement_public_key());
    info!(%signing_public, %agreement_public, "Device identity ready");
    println!("ed25519-public={}", signing_public);
    println!("x25519-public={}", agreement_public);

    let legacy = match &config.legacy_rsa_key_path {
        Some(path) => {
            let unwrapper = LegacyKeyUnwrapper::from_pem_file(path)
                .with_context(|| format!("Failed to load RSA key from {}", path.display()))?;
            info!("Legacy key path enabled");
            Some(Arc::new(unwrapper))
        }
        None => None,
    };

    if args.self_test {
        run_self_test(identity, legacy)?;
        println!("self-test: ok");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_paths_and_flags() {
        let args = parse_args_from(argv(&["-i", "id.keys", "--rsa-key", "rsa.pem", "-d", "-t"]))
            .unwrap();
        assert_eq!(args.identity, Some(PathBuf::from("id.keys")));
        assert_eq!(args.rsa_key, Some(PathBuf::from("rsa.pem")));
        assert!(args.debug);
        assert!(args.self_test);
    }

    #[test]
    fn missing_path_is_config_error() {
        let err = parse_args_from(argv(&["--identity"])).unwrap_err();
        assert_eq!(err, ConfigError::MissingValue("--identity"));

        let err = parse_args_from(argv(&["-d", "-k"])).unwrap_err();
        assert_eq!(err, ConfigError::MissingValue("--rsa-key"));
        assert_eq!(err.to_string(), "Missing value for --rsa-key");
    }
}
