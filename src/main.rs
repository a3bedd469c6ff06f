//! beam-trace - safety envelope report for a transmitter/receiver geometry
//!
//! Computes wavelength, divergence, spot diameter and power density for the
//! given transmitter power and range, and classifies the density against the
//! 1 kW/m² limit. The exit status is non-zero when the limit is exceeded or
//! the inputs are invalid.
//!
//! With `--simulate`, a simulated GRN is also walked through the full
//! authorization protocol for the same geometry, with a logging beam output.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use rand_core::{OsRng, RngCore};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use beamgate::config::CoordinatorConfig;
use beamgate::{
    unix_now, AuthState, Coordinator, GroundNode, LoggedBeam, Reply, SafetyEnvelope,
};

#[derive(Debug, Parser)]
#[command(name = "beam-trace", version, about = "Beam safety envelope calculator")]
struct Args {
    /// ISH output power in watts
    #[arg(long = "ish-power", alias = "ish_power")]
    ish_power: f64,

    /// Distance to receiver in meters
    #[arg(long)]
    distance: f64,

    /// Transmitter frequency in Hz (defaults to the config value)
    #[arg(long)]
    frequency: Option<f64>,

    /// Transmitter aperture diameter in meters (defaults to the config value)
    #[arg(long)]
    aperture: Option<f64>,

    /// Coordinator config (TOML) supplying frequency and aperture
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Print the envelope as JSON
    #[arg(long)]
    json: bool,

    /// Run a simulated node through the authorization protocol
    #[arg(long)]
    simulate: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("beam-trace v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CoordinatorConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => CoordinatorConfig::default(),
    };

    let envelope = SafetyEnvelope::compute(
        args.ish_power,
        args.distance,
        args.frequency.unwrap_or(config.frequency_hz),
        args.aperture.unwrap_or(config.aperture_diameter_m),
    )
    .context("invalid beam parameters")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        println!("{envelope}");
    }

    if args.simulate {
        let config = CoordinatorConfig {
            frequency_hz: envelope.frequency,
            aperture_diameter_m: envelope.aperture_diameter,
            ..config
        };
        let state = simulate(config, args.ish_power, args.distance)?;
        info!("simulated node finished in {:?}", state);
    }

    if envelope.within_limit {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            "power density {:.1} W/m² exceeds the safety limit",
            envelope.power_density
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Walk one simulated GRN from beacon to beam enable
fn simulate(config: CoordinatorConfig, ish_power: f64, distance: f64) -> anyhow::Result<AuthState> {
    let coordinator = Coordinator::new(config, Arc::new(LoggedBeam));
    let mut node = GroundNode::generate("GRN-001")?;
    coordinator.register(node.identity());

    let now = unix_now();
    coordinator.handle(node.beacon(now)?, now)?;
    info!("Beacon verified: {}", node.node_id());

    // Key agreement is external; the simulation uses a random pre-shared key
    let mut key_material = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut key_material[..]);
    let message = node.session_key_message(&key_material[..]);
    let nonce = match coordinator.handle(message, now)? {
        Reply::Nonce(nonce) => nonce,
        other => anyhow::bail!("unexpected reply to session key: {other:?}"),
    };

    let now = unix_now();
    coordinator.handle(node.heartbeat(now), now)?;
    coordinator.handle(node.ready(&nonce), now)?;

    match coordinator.authorize(node.node_id(), ish_power, distance, unix_now()) {
        Ok(state) => Ok(state),
        Err(err) => {
            warn!("authorization refused: {}", err);
            Ok(coordinator.state(node.node_id()))
        }
    }
}
