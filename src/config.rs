//! Coordinator configuration
//!
//! All timing values are in seconds, matching beacon and heartbeat
//! timestamps. Missing keys in a TOML file fall back to the defaults below.

use serde::{Deserialize, Serialize};

use crate::liveness::{DEFAULT_HEARTBEAT_INTERVAL, LOSS_MULTIPLIER};
use crate::safety::{DEFAULT_APERTURE_DIAMETER, DEFAULT_FREQUENCY};

/// Default beacon freshness window (seconds either side of `now`)
pub const DEFAULT_FRESHNESS_WINDOW: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Maximum |now - beacon.timestamp| accepted by the verifier
    pub freshness_window_secs: f64,
    /// Nominal heartbeat cadence expected from each node
    pub heartbeat_interval_secs: f64,
    /// Cadence of the background liveness sweep
    pub sweep_interval_secs: f64,
    /// Transmitter frequency used by the safety envelope
    pub frequency_hz: f64,
    /// Transmitter aperture used by the safety envelope
    pub aperture_diameter_m: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL,
            sweep_interval_secs: DEFAULT_HEARTBEAT_INTERVAL,
            frequency_hz: DEFAULT_FREQUENCY,
            aperture_diameter_m: DEFAULT_APERTURE_DIAMETER,
        }
    }
}

impl CoordinatorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Liveness timeout derived from the heartbeat interval
    pub fn liveness_timeout_secs(&self) -> f64 {
        LOSS_MULTIPLIER * self.heartbeat_interval_secs
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("freshness_window_secs", self.freshness_window_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("frequency_hz", self.frequency_hz),
            ("aperture_diameter_m", self.aperture_diameter_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                anyhow::bail!("{name} must be finite and > 0, got {value}");
            }
        }

        // A sweep slower than the timeout could leave a dead node enabled
        if self.sweep_interval_secs >= self.liveness_timeout_secs() {
            anyhow::bail!(
                "sweep_interval_secs ({}) must be shorter than the liveness timeout ({})",
                self.sweep_interval_secs,
                self.liveness_timeout_secs()
            );
        }

        Ok(())
    }
}
