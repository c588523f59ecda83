//! Satellite geometry: altitude sampling, field of view, elevation angles.
//!
//! The satellite is assumed nadir-pointing with its coverage reaching down to
//! 0° elevation on the ground, so that the edge of its field of view is the
//! tangent from the satellite to the Earth's surface. Everything here is a
//! function of altitude and of the angular separation between two pixels of
//! the tessellation; no orbital dynamics are involved.
//!
//! The elevation tensor is the dominant cost of a run, `N_alt × N_pix²`
//! evaluations. Each altitude slab depends only on the altitude and on the
//! (altitude-independent) pixel separations, so slabs are computed in
//! parallel without any shared accumulator.

use crate::error::{Error, Result};
use crate::healpix::Tessellation;
use rayon::prelude::*;
use tracing::debug;

/// Mean equatorial radius of the Earth (km).
pub const EARTH_RADIUS_KM: f64 = 6378.1;

/// Elevation assigned where the separation vanishes: straight down.
///
/// This is the limit of the elevation formula as the separation goes to zero,
/// under its convention of negative angles below the satellite's horizontal.
pub const NADIR_ELEVATION_DEG: f64 = -90.0;

/// Satellite altitudes (km), strictly positive and increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct Altitudes(Vec<f64>);

impl Altitudes {
    /// `count` altitudes evenly spaced in log between `min_km` and `max_km`.
    ///
    /// Both ends are included exactly. A count of one gives `[min_km]`.
    pub fn log_spaced(min_km: f64, max_km: f64, count: usize) -> Result<Self> {
        if !(min_km > 0.0) || !(max_km > 0.0) || !min_km.is_finite() || !max_km.is_finite() {
            return Err(Error::InvalidAltitudeRange(format!(
                "altitudes must be positive, got {} to {} km",
                min_km, max_km
            )));
        }

        if min_km >= max_km {
            return Err(Error::InvalidAltitudeRange(format!(
                "minimum {} km is not below maximum {} km",
                min_km, max_km
            )));
        }

        if count == 0 {
            return Err(Error::InvalidAltitudeRange("altitude count is zero".into()));
        }

        if count == 1 {
            return Ok(Self(vec![min_km]));
        }

        let (lo, hi) = (min_km.log10(), max_km.log10());
        let step = (hi - lo) / (count - 1) as f64;
        let mut values: Vec<f64> = (0..count)
            .map(|i| 10f64.powf(lo + step * i as f64))
            .collect();
        values[0] = min_km;
        values[count - 1] = max_km;

        Ok(Self(values))
    }

    /// An explicit list of altitudes.
    pub fn from_values(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidAltitudeRange("altitude list is empty".into()));
        }

        if values.iter().any(|&a| !(a > 0.0) || !a.is_finite()) {
            return Err(Error::InvalidAltitudeRange(format!(
                "altitudes must be positive, got {:?}",
                values
            )));
        }

        if values.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidAltitudeRange(format!(
                "altitudes must be strictly increasing, got {:?}",
                values
            )));
        }

        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Field of view (radians) for full coverage down to 0° elevation.
///
/// The angle at the satellite between nadir and the tangent to the Earth is
/// `asin(R / (R + h))`; the field of view spans it on both sides.
pub fn field_of_view(altitude_km: f64, earth_radius_km: f64) -> f64 {
    2.0 * (earth_radius_km / (earth_radius_km + altitude_km)).asin()
}

/// Angle at the Earth's centre subtending the coverage disc (radians).
pub fn central_angle(altitude_km: f64, earth_radius_km: f64) -> f64 {
    (earth_radius_km / (earth_radius_km + altitude_km)).acos()
}

/// Field-of-view figures for one altitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FovGeometry {
    pub altitude_km: f64,

    /// See [`field_of_view`].
    pub field_of_view: f64,

    /// See [`central_angle`].
    pub central_angle: f64,
}

impl FovGeometry {
    pub fn new(altitude_km: f64, earth_radius_km: f64) -> Self {
        Self {
            altitude_km,
            field_of_view: field_of_view(altitude_km, earth_radius_km),
            central_angle: central_angle(altitude_km, earth_radius_km),
        }
    }

    /// Angular radius (radians) of the coverage disc on the unit sphere.
    ///
    /// The ground disc has radius `central_angle × R` km; divided by `R` it is
    /// the central angle itself, which is what disc queries expect.
    pub fn fov_radius(&self) -> f64 {
        self.central_angle
    }
}

/// Field-of-view figures for every altitude, in altitude order.
pub fn fov_geometries(altitudes: &Altitudes, earth_radius_km: f64) -> Vec<FovGeometry> {
    altitudes
        .as_slice()
        .iter()
        .map(|&h| FovGeometry::new(h, earth_radius_km))
        .collect()
}

/// Great-circle separation (radians) between two points given by co-latitude
/// and longitude in degrees, by the spherical law of cosines.
///
/// The cosine is clamped so that coincident points give exactly zero.
pub fn great_circle_separation(colat_i: f64, lon_i: f64, colat_j: f64, lon_j: f64) -> f64 {
    let (ci, cj) = (colat_i.to_radians(), colat_j.to_radians());
    let cos = ci.cos() * cj.cos() + ci.sin() * cj.sin() * (lon_j - lon_i).to_radians().cos();
    cos.max(-1.0).min(1.0).acos()
}

/// Elevation angle (degrees) of a ground point seen from the satellite.
///
/// The angle is measured from the satellite's local horizontal plane, negative
/// below it. With `B = (h + R) / R` and `s` the separation in radians between
/// the sub-satellite point and the ground point:
///
/// `elevation = -atan((B - cos s) / sin s)`
///
/// At zero separation the quotient is undefined; the point is then straight
/// below and [`NADIR_ELEVATION_DEG`] is returned.
pub fn elevation_angle(separation: f64, altitude_km: f64, earth_radius_km: f64) -> f64 {
    let sin = separation.sin();
    if sin.abs() < f64::EPSILON {
        return NADIR_ELEVATION_DEG;
    }

    let b = (altitude_km + earth_radius_km) / earth_radius_km;
    -((b - separation.cos()) / sin).atan().to_degrees()
}

/// Elevation angle (degrees) of pixel `target` seen from above pixel `source`.
pub fn pixel_elevation(
    tess: &Tessellation,
    source: usize,
    target: usize,
    altitude_km: f64,
    earth_radius_km: f64,
) -> f64 {
    if source == target {
        return NADIR_ELEVATION_DEG;
    }

    let separation = great_circle_separation(
        tess.colatitudes()[source],
        tess.longitudes()[source],
        tess.colatitudes()[target],
        tess.longitudes()[target],
    );
    elevation_angle(separation, altitude_km, earth_radius_km)
}

/// Elevation angles for every altitude and every ordered pixel pair.
///
/// Stored flat, altitude-major: `[altitude][source pixel][target pixel]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationTensor {
    npix: usize,
    altitudes: Vec<f64>,
    earth_radius_km: f64,
    data: Vec<f64>,
}

impl ElevationTensor {
    /// Computes the full tensor.
    pub fn compute(tess: &Tessellation, altitudes: &Altitudes, earth_radius_km: f64) -> Self {
        let npix = tess.pixel_count();
        let separations = pixel_separations(tess);

        let slabs: Vec<Vec<f64>> = altitudes
            .as_slice()
            .par_iter()
            .enumerate()
            .map(|(k, &altitude)| {
                debug!(altitude_km = altitude, index = k, pixels = npix, "elevation slab");
                separations
                    .iter()
                    .map(|&s| elevation_angle(s, altitude, earth_radius_km))
                    .collect()
            })
            .collect();

        Self {
            npix,
            altitudes: altitudes.as_slice().to_vec(),
            earth_radius_km,
            data: slabs.concat(),
        }
    }

    /// Wraps precomputed values, checking the shape.
    pub(crate) fn from_parts(
        npix: usize,
        altitudes: Vec<f64>,
        earth_radius_km: f64,
        data: Vec<f64>,
    ) -> Option<Self> {
        if data.len() != altitudes.len() * npix * npix {
            return None;
        }

        Some(Self {
            npix,
            altitudes,
            earth_radius_km,
            data,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.npix
    }

    pub fn altitudes(&self) -> &[f64] {
        &self.altitudes
    }

    pub fn earth_radius_km(&self) -> f64 {
        self.earth_radius_km
    }

    /// Elevation (degrees) of `target` seen from above `source` at altitude
    /// index `altitude`.
    pub fn get(&self, altitude: usize, source: usize, target: usize) -> f64 {
        self.row(altitude, source)[target]
    }

    /// Elevations of every target pixel seen from above `source`.
    pub fn row(&self, altitude: usize, source: usize) -> &[f64] {
        let start = (altitude * self.npix + source) * self.npix;
        &self.data[start..start + self.npix]
    }

    pub(crate) fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Great-circle separation (radians) of every ordered pixel pair, row-major.
///
/// Does not depend on altitude. The diagonal is exactly zero.
fn pixel_separations(tess: &Tessellation) -> Vec<f64> {
    let npix = tess.pixel_count();
    let colats = tess.colatitudes();
    let lons = tess.longitudes();

    let rows: Vec<Vec<f64>> = (0..npix)
        .into_par_iter()
        .map(|i| {
            (0..npix)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        great_circle_separation(colats[i], lons[i], colats[j], lons[j])
                    }
                })
                .collect()
        })
        .collect();

    rows.concat()
}
