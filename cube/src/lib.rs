//! Terrestrial FM broadcast interference as seen from orbit.
//!
//! The sky below a satellite is cut into equal-area HEALPix pixels. For each
//! satellite altitude and each pixel the satellite could sit above, this
//! crate works out which FM transmitters fall within its field of view, how
//! far off nadir each of them is, and how much power each delivers through a
//! simple analytic beam. The result is a power cube of equivalent antenna
//! temperature indexed by altitude, pixel and frequency bin.
//!
//! The pipeline, in order:
//!
//!  1. [`healpix`]: pixel centres of the tessellation.
//!  2. [`geometry`]: field of view per altitude, and the elevation angle of
//!     every pixel seen from above every other pixel. This is the expensive
//!     part and is cached on disk by [`cache`].
//!  3. [`fov`]: disc queries selecting the transmitters each pixel sees.
//!  4. [`friis`]: free-space received power of every transmitter at every
//!     altitude.
//!  5. [`aggregate`]: beam-weighted sums into the cube, per frequency bin
//!     of the axis from [`frequency`].
//!
//! Parameters enter through [`config::Settings`] and are validated once;
//! everything downstream takes the [`config::Validated`] values. All stages
//! are deterministic: the parallel ones collect in index order.

#![forbid(unsafe_code)]
#![cfg_attr(feature = "cargo-clippy", deny(clippy_pedantic))]

pub mod aggregate;
pub mod beam;
pub mod cache;
pub mod config;
pub mod error;
pub mod fov;
pub mod frequency;
pub mod friis;
pub mod geometry;
pub mod healpix;
pub mod transmitter;

pub use aggregate::PowerCube;
pub use beam::BeamPattern;
pub use config::{Settings, Validated};
pub use error::{Error, Result};
pub use transmitter::{CountrySelection, Database, Transmitter, TransmitterTable};

use cache::ElevationCache;
use fov::Visibility;
use friis::PowerMatrix;
use geometry::{fov_geometries, ElevationTensor, FovGeometry};
use tracing::{info, warn};

/// Every intermediate product of one run, and the cube.
#[derive(Clone, Debug)]
pub struct Simulation {
    pub table: TransmitterTable,
    pub geometry: Vec<FovGeometry>,
    pub elevations: ElevationTensor,
    pub visibility: Visibility,
    pub power: PowerMatrix,
    pub cube: PowerCube,
}

impl Simulation {
    /// Runs the whole pipeline over a set of transmitters.
    ///
    /// With a cache directory configured, elevation angles are loaded from it
    /// when present and written to it otherwise. A damaged cache file is
    /// recomputed and replaced.
    pub fn run(params: &Validated, transmitters: Vec<Transmitter>) -> Result<Self> {
        let tess = &params.tessellation;
        let radius = params.earth_radius_km;

        if params.bandwidth_mismatch() {
            warn!(
                bandwidth_hz = params.channel_bandwidth_hz,
                step_mhz = params.frequencies.step(),
                "channel bandwidth differs from the frequency step"
            );
        }

        let table = TransmitterTable::prepare(transmitters, tess, &params.frequencies)?;
        info!(
            transmitters = table.len(),
            pixels = tess.pixel_count(),
            altitudes = params.altitudes.len(),
            bins = params.frequencies.len(),
            beam = %params.beam,
            "starting run"
        );

        let geometry = fov_geometries(&params.altitudes, radius);
        for g in &geometry {
            info!(
                altitude_km = g.altitude_km,
                fov_deg = g.field_of_view.to_degrees(),
                central_angle_deg = g.central_angle.to_degrees(),
                "field of view"
            );
        }

        let elevations = match &params.cache_dir {
            Some(dir) => ElevationCache::new(dir).load_or_compute(tess, &params.altitudes, radius)?,
            None => ElevationTensor::compute(tess, &params.altitudes, radius),
        };
        info!("elevation angles ready");

        let visibility = Visibility::resolve(tess, &geometry, &table);
        info!("fields of view resolved");

        let power = PowerMatrix::compute(&table, params.altitudes.as_slice(), params.channel_bandwidth_hz)?;
        let cube = PowerCube::aggregate(
            &table,
            &power,
            &elevations,
            &visibility,
            params.beam,
            &params.frequencies,
        );
        let (a, p, f) = cube.shape();
        info!(altitudes = a, pixels = p, bins = f, "power cube assembled");

        Ok(Self {
            table,
            geometry,
            elevations,
            visibility,
            power,
            cube,
        })
    }
}

/// Builds the power cube for a set of transmitters.
pub fn simulate(params: &Validated, transmitters: Vec<Transmitter>) -> Result<PowerCube> {
    Simulation::run(params, transmitters).map(|sim| sim.cube)
}
