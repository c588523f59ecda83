//! Free-space received power by the Friis transmission equation.
//!
//! Transmit and receive antennas are taken as isotropic (unit gain); the
//! transmitter's EIRP already carries its own antenna gain. The only loss is
//! free-space spreading over the satellite altitude:
//!
//! `P_rx = EIRP × λ² / (4π d)²`
//!
//! Power is then expressed as an equivalent noise temperature over one
//! channel, `T = P_rx / (k_B × Δν)`, which is the unit of the interference
//! cube.

use crate::error::{Error, Result};
use crate::transmitter::TransmitterTable;
use std::f64::consts::PI;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.380_649e-23;

/// Channel bandwidth (Hz) used for the Kelvin conversion unless configured.
///
/// Matches the default frequency-axis step of 0.244 MHz.
pub const DEFAULT_CHANNEL_BANDWIDTH_HZ: f64 = 244e3;

/// Received power of one transmitter at one distance, in every unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceivedPower {
    pub watts: f64,
    pub dbm: f64,
    pub dbw: f64,
    pub kelvin: f64,
}

/// Free-space wavelength (m) of a frequency given in MHz.
pub fn wavelength(frequency_mhz: f64) -> f64 {
    SPEED_OF_LIGHT / (frequency_mhz * 1e6)
}

/// Power received at `distance_km` from a transmitter.
///
/// Rejects non-positive EIRP, frequency, distance or bandwidth.
pub fn received_power(
    eirp_w: f64,
    frequency_mhz: f64,
    distance_km: f64,
    bandwidth_hz: f64,
) -> Result<ReceivedPower> {
    for &(name, value) in &[
        ("EIRP", eirp_w),
        ("frequency", frequency_mhz),
        ("distance", distance_km),
        ("channel bandwidth", bandwidth_hz),
    ] {
        if !(value > 0.0) || !value.is_finite() {
            return Err(Error::InvalidInput(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
    }

    let lambda = wavelength(frequency_mhz);
    let watts = eirp_w * lambda.powi(2) / (4.0 * PI * distance_km * 1e3).powi(2);
    let dbw = 10.0 * watts.log10();

    Ok(ReceivedPower {
        watts,
        dbm: dbw + 30.0,
        dbw,
        kelvin: watts / (BOLTZMANN * bandwidth_hz),
    })
}

/// Received power of every transmitter at every altitude.
///
/// Indexed `[transmitter][altitude]`, in table order.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerMatrix {
    altitudes: usize,
    values: Vec<ReceivedPower>,
}

impl PowerMatrix {
    pub fn compute(
        table: &TransmitterTable,
        altitudes_km: &[f64],
        bandwidth_hz: f64,
    ) -> Result<Self> {
        let mut values = Vec::with_capacity(table.len() * altitudes_km.len());
        for tx in table.records() {
            for &altitude in altitudes_km {
                values.push(received_power(
                    tx.eirp_w,
                    tx.frequency_mhz,
                    altitude,
                    bandwidth_hz,
                )?);
            }
        }

        Ok(Self {
            altitudes: altitudes_km.len(),
            values,
        })
    }

    pub fn get(&self, transmitter: usize, altitude: usize) -> &ReceivedPower {
        &self.values[transmitter * self.altitudes + altitude]
    }

    /// Equivalent temperature (K) of a transmitter at an altitude index.
    pub fn kelvin(&self, transmitter: usize, altitude: usize) -> f64 {
        self.get(transmitter, altitude).kelvin
    }
}
