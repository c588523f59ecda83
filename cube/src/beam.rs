//! Analytic antenna beam patterns.
//!
//! The receiving antenna's gain depends only on the elevation angle of the
//! source, measured from the satellite's horizontal plane. Patterns are
//! frequency independent and azimuthally symmetric.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Beam pattern of the satellite antenna.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeamPattern {
    /// `cos²(θ)`: unit gain along the horizontal plane, null at nadir.
    #[serde(rename = "cos square")]
    CosSquare,

    /// `sin²(θ)`: unit gain at nadir, null along the horizontal plane.
    #[serde(rename = "sin square")]
    SinSquare,
}

impl Default for BeamPattern {
    fn default() -> Self {
        BeamPattern::CosSquare
    }
}

impl BeamPattern {
    /// Gain at an elevation angle given in degrees.
    pub fn gain(self, elevation_deg: f64) -> f64 {
        let theta = elevation_deg.to_radians();
        match self {
            BeamPattern::CosSquare => theta.cos().powi(2),
            BeamPattern::SinSquare => theta.sin().powi(2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BeamPattern::CosSquare => "cos square",
            BeamPattern::SinSquare => "sin square",
        }
    }
}

impl FromStr for BeamPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cos square" => Ok(BeamPattern::CosSquare),
            "sin square" => Ok(BeamPattern::SinSquare),
            other => Err(Error::UnknownBeamPattern(other.to_string())),
        }
    }
}

impl fmt::Display for BeamPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Gain of the named pattern at an elevation angle in degrees.
pub fn beam_gain(pattern: &str, elevation_deg: f64) -> Result<f64> {
    Ok(pattern.parse::<BeamPattern>()?.gain(elevation_deg))
}
