//! Equal-area, iso-latitude tessellation of the sphere.
//!
//! This is the [HEALPix] scheme of Górski et al. ([2005][G05]) in its RING
//! ordering: the sphere is cut into `12 × nside²` pixels of identical area,
//! whose centres sit on `4 × nside - 1` rings of constant latitude. Pixels are
//! numbered from the north pole eastwards along each ring, ring after ring,
//! down to the south pole.
//!
//! The same tessellation is used for the ground (where transmitters are
//! binned) and for the sky above it (where the satellite is placed), so a
//! pixel id means "this patch of Earth" and "the point in orbit right above
//! it" at the same time.
//!
//! Pixel arithmetic (centres and position lookup) comes from `scorus`. This
//! module adds the precomputed centre tables the pipeline reads on every
//! query, and the spherical cap ("disc") query, scanning only the rings whose
//! latitude overlaps the cap.
//!
//! [HEALPix]: https://healpix.sourceforge.io/
//! [G05]: https://doi.org/10.1086/427976

use crate::error::{Error, Result};
use scorus::coordinates::SphCoord;
use scorus::healpix::pix::{ang2pix_ring, pix2ang_ring};
use scorus::healpix::utils::nside2npix;
use std::f64::consts::PI;
use std::ops::Range;

/// Largest nside whose pixel count still fits comfortably in 64-bit ids.
const MAX_NSIDE: i64 = 1 << 29;

/// Slack on ring selection during disc queries, to absorb rounding.
const RING_SLACK: f64 = 1e-12;

/// A unit vector in Earth-centred Cartesian coordinates.
pub type Vec3 = [f64; 3];

/// One tessellation of the sphere, with pixel centres precomputed.
#[derive(Clone, Debug, PartialEq)]
pub struct Tessellation {
    nside: usize,

    /// Pixel centre longitudes, degrees in `[0, 360)`.
    longitudes: Vec<f64>,

    /// Pixel centre co-latitudes, degrees in `(0, 180)`.
    colatitudes: Vec<f64>,

    vectors: Vec<Vec3>,

    /// Pixel id ranges of the iso-latitude rings, north to south, with the
    /// ring co-latitude in radians.
    rings: Vec<(Range<usize>, f64)>,
}

impl Tessellation {
    /// Builds the tessellation for a resolution parameter.
    ///
    /// `nside` must be a power of two between 1 and 2²⁹.
    pub fn new(nside: i64) -> Result<Self> {
        if nside <= 0 || nside > MAX_NSIDE || nside & (nside - 1) != 0 {
            return Err(Error::InvalidResolution(nside));
        }

        let nside = nside as usize;
        let npix = nside2npix(nside);
        let mut longitudes = Vec::with_capacity(npix);
        let mut colatitudes = Vec::with_capacity(npix);
        let mut vectors = Vec::with_capacity(npix);
        let mut rings: Vec<(Range<usize>, f64)> = Vec::with_capacity(4 * nside - 1);

        for pix in 0..npix {
            let centre: SphCoord<f64> = pix2ang_ring(nside, pix);
            longitudes.push(centre.az.to_degrees());
            colatitudes.push(centre.pol.to_degrees());
            vectors.push(angle_to_vector(centre.pol, centre.az));

            // RING ordering: a ring is a run of pixels sharing one co-latitude
            match rings.last_mut() {
                Some((range, theta)) if *theta == centre.pol => range.end = pix + 1,
                _ => rings.push((pix..pix + 1, centre.pol)),
            }
        }

        Ok(Self {
            nside,
            longitudes,
            colatitudes,
            vectors,
            rings,
        })
    }

    /// Resolution parameter.
    pub fn nside(&self) -> u64 {
        self.nside as u64
    }

    /// Number of pixels, `12 × nside²`.
    pub fn pixel_count(&self) -> usize {
        self.vectors.len()
    }

    /// Pixel ids, the contiguous range `0..pixel_count`.
    pub fn pixel_ids(&self) -> Range<usize> {
        0..self.pixel_count()
    }

    /// Longitudes of the pixel centres in degrees, indexed by pixel id.
    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    /// Co-latitudes of the pixel centres in degrees, indexed by pixel id.
    pub fn colatitudes(&self) -> &[f64] {
        &self.colatitudes
    }

    /// Unit vector through the centre of a pixel.
    ///
    /// Panics if `pixel` is not a valid id.
    pub fn vector(&self, pixel: usize) -> Vec3 {
        self.vectors[pixel]
    }

    /// Pixel containing the direction given by co-latitude `theta` and
    /// longitude `phi`, both in radians.
    pub fn angle_to_pixel(&self, theta: f64, phi: f64) -> usize {
        let theta = theta.max(0.0).min(PI);
        let phi = phi.rem_euclid(2.0 * PI);
        ang2pix_ring(self.nside, SphCoord::new(theta, phi))
    }

    /// Pixel containing a geographic position given in degrees.
    pub fn lonlat_to_pixel(&self, longitude: f64, latitude: f64) -> usize {
        self.angle_to_pixel((90.0 - latitude).to_radians(), longitude.to_radians())
    }

    /// Pixels whose centres lie within `radius` radians of `center`.
    ///
    /// The centre vector need not be normalised. Results are in ascending
    /// pixel order.
    pub fn query_disc(&self, center: Vec3, radius: f64) -> Vec<usize> {
        if radius >= PI {
            return self.pixel_ids().collect();
        }

        let norm = (center[0].powi(2) + center[1].powi(2) + center[2].powi(2)).sqrt();
        let center = [center[0] / norm, center[1] / norm, center[2] / norm];
        let theta0 = center[2].max(-1.0).min(1.0).acos();
        let lowest = theta0 - radius - RING_SLACK;
        let highest = theta0 + radius + RING_SLACK;
        let cos_radius = radius.cos();

        let mut pixels = Vec::new();
        for (range, theta) in &self.rings {
            if *theta < lowest || *theta > highest {
                continue;
            }

            pixels.extend(range.clone().filter(|&pix| {
                let v = &self.vectors[pix];
                v[0] * center[0] + v[1] * center[1] + v[2] * center[2] >= cos_radius
            }));
        }

        pixels
    }
}

/// Unit vector for co-latitude `theta` and longitude `phi`, in radians.
pub fn angle_to_vector(theta: f64, phi: f64) -> Vec3 {
    let sin_theta = theta.sin();
    [sin_theta * phi.cos(), sin_theta * phi.sin(), theta.cos()]
}
