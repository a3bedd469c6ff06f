//! Safety envelope calculation
//!
//! Diffraction-limited model of the beam at the receiver: the half-angle of
//! the first null of a circular aperture sets the divergence, the spot is the
//! cone cross-section at `distance`, and the power is assumed uniform across
//! the spot. Atmospheric loss and the Gaussian profile are not modelled.
//!
//! The threshold is a fixed exposure limit and is deliberately not
//! configurable.

use std::f64::consts::PI;
use std::fmt;

use serde::Serialize;

use crate::error::{AuthError, Result};

/// Propagation speed used for the wavelength (m/s)
pub const SPEED_OF_LIGHT: f64 = 3e8;

/// Maximum permitted power density at the receiver (W/m²)
pub const POWER_DENSITY_LIMIT: f64 = 1000.0;

/// First-null coefficient for a circular aperture
const AIRY_FIRST_NULL: f64 = 1.22;

/// Default transmitter frequency (5.8 GHz ISM band)
pub const DEFAULT_FREQUENCY: f64 = 5.8e9;

/// Default transmitter aperture diameter (m)
pub const DEFAULT_APERTURE_DIAMETER: f64 = 1000.0;

/// Beam geometry and power density at the receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafetyEnvelope {
    pub ish_power: f64,
    pub distance: f64,
    pub frequency: f64,
    pub aperture_diameter: f64,
    pub wavelength: f64,
    pub divergence_angle: f64,
    pub spot_diameter: f64,
    pub power_density: f64,
    pub within_limit: bool,
}

impl SafetyEnvelope {
    /// Compute the envelope for the given transmitter and range
    ///
    /// Every input must be finite and strictly positive.
    pub fn compute(
        ish_power: f64,
        distance: f64,
        frequency: f64,
        aperture_diameter: f64,
    ) -> Result<Self> {
        require_positive("ish_power", ish_power)?;
        require_positive("distance", distance)?;
        require_positive("frequency", frequency)?;
        require_positive("aperture_diameter", aperture_diameter)?;

        let wavelength = SPEED_OF_LIGHT / frequency;
        let divergence_angle = AIRY_FIRST_NULL * wavelength / aperture_diameter;
        let spot_diameter = divergence_angle * distance;
        let area = PI * (spot_diameter / 2.0).powi(2);
        let power_density = ish_power / area;

        Ok(Self {
            ish_power,
            distance,
            frequency,
            aperture_diameter,
            wavelength,
            divergence_angle,
            spot_diameter,
            power_density,
            within_limit: power_density <= POWER_DENSITY_LIMIT,
        })
    }

    /// Compute with the default 5.8 GHz / 1000 m transmitter
    pub fn with_defaults(ish_power: f64, distance: f64) -> Result<Self> {
        Self::compute(ish_power, distance, DEFAULT_FREQUENCY, DEFAULT_APERTURE_DIAMETER)
    }

    /// `Ok(())` when within limit, `SafetyLimitExceeded` otherwise
    pub fn ensure_within_limit(&self) -> Result<()> {
        if self.within_limit {
            Ok(())
        } else {
            Err(AuthError::SafetyLimitExceeded {
                power_density: self.power_density,
                threshold: POWER_DENSITY_LIMIT,
            })
        }
    }
}

fn require_positive(parameter: &'static str, value: f64) -> Result<()> {
    // NaN fails the comparison as well
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AuthError::InvalidPhysicalInput { parameter, value })
    }
}

impl fmt::Display for SafetyEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ISH Power: {:.1} GW", self.ish_power / 1e9)?;
        writeln!(f, "Distance: {:.1} × 10^11 m", self.distance / 1e11)?;
        writeln!(f, "Wavelength: {:.3} m", self.wavelength)?;
        writeln!(f, "Aperture: {} m", self.aperture_diameter)?;
        writeln!(
            f,
            "Beam divergence: {:.1} µrad ({:.4}°)",
            self.divergence_angle * 1e6,
            self.divergence_angle.to_degrees()
        )?;
        writeln!(f, "Spot diameter: {:.0} km", self.spot_diameter / 1000.0)?;
        writeln!(f, "Power density: {:.1} W/m²", self.power_density)?;
        if self.within_limit {
            write!(f, "✓ Within safety limits.")
        } else {
            write!(f, "WARNING: Power density exceeds 1 kW/m² safety limit!")
        }
    }
}
