//! Which transmitters each sky pixel sees, at each altitude.
//!
//! For a satellite above pixel `p` at altitude `h`, the ground it covers is
//! the spherical cap centred on `p` with angular radius equal to the central
//! angle for `h`. Transmitters binned into any pixel of that cap are visible.

use crate::geometry::FovGeometry;
use crate::healpix::{Tessellation, Vec3};
use crate::transmitter::TransmitterTable;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Pixels whose centres lie within `angular_radius` of `direction`.
pub fn disc_membership(tess: &Tessellation, direction: Vec3, angular_radius: f64) -> Vec<usize> {
    tess.query_disc(direction, angular_radius)
}

/// Transmitters (as table row indices, in table order) whose pixel belongs to
/// `disc`.
pub fn visible_transmitters(table: &TransmitterTable, disc: &[usize]) -> Vec<usize> {
    TransmitterIndex::new(table).visible(disc)
}

/// Transmitter rows grouped by pixel.
#[derive(Clone, Debug)]
pub struct TransmitterIndex {
    by_pixel: HashMap<usize, Vec<usize>>,
}

impl TransmitterIndex {
    pub fn new(table: &TransmitterTable) -> Self {
        let mut by_pixel: HashMap<usize, Vec<usize>> = HashMap::new();
        for (row, &pixel) in table.pixels().iter().enumerate() {
            by_pixel.entry(pixel).or_default().push(row);
        }

        Self { by_pixel }
    }

    /// Rows in `disc`, sorted back into table order.
    pub fn visible(&self, disc: &[usize]) -> Vec<usize> {
        let mut rows: Vec<usize> = disc
            .iter()
            .filter_map(|pixel| self.by_pixel.get(pixel))
            .flatten()
            .copied()
            .collect();
        rows.sort_unstable();
        rows
    }

    /// Number of distinct pixels holding at least one transmitter.
    pub fn occupied_pixels(&self) -> usize {
        self.by_pixel.len()
    }
}

/// Visible transmitter rows for every (altitude, pixel) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Visibility {
    npix: usize,
    cells: Vec<Vec<usize>>, // [altitude][pixel]
}

impl Visibility {
    /// Runs one disc query per (altitude, pixel) and intersects it with the
    /// transmitter pixels.
    pub fn resolve(tess: &Tessellation, geometries: &[FovGeometry], table: &TransmitterTable) -> Self {
        let npix = tess.pixel_count();
        let index = TransmitterIndex::new(table);
        debug!(occupied = index.occupied_pixels(), "transmitter pixels");

        let mut cells = Vec::with_capacity(geometries.len() * npix);
        for (k, geometry) in geometries.iter().enumerate() {
            let radius = geometry.fov_radius();
            let mut slab: Vec<Vec<usize>> = tess
                .pixel_ids()
                .into_par_iter()
                .map(|pixel| index.visible(&disc_membership(tess, tess.vector(pixel), radius)))
                .collect();

            let seen = slab.iter().filter(|rows| !rows.is_empty()).count();
            debug!(
                altitude_km = geometry.altitude_km,
                index = k,
                radius_deg = radius.to_degrees(),
                pixels_with_transmitters = seen,
                "resolved field of view"
            );
            cells.append(&mut slab);
        }

        Self { npix, cells }
    }

    /// Visible transmitter rows above `pixel` at altitude index `altitude`.
    pub fn visible(&self, altitude: usize, pixel: usize) -> &[usize] {
        &self.cells[altitude * self.npix + pixel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::FrequencyAxis;
    use crate::geometry::{fov_geometries, Altitudes, EARTH_RADIUS_KM};
    use crate::transmitter::Transmitter;

    fn table(tess: &Tessellation, positions: &[(f64, f64)]) -> TransmitterTable {
        let axis = FrequencyAxis::new(88.0, 108.0, 0.5).unwrap();
        let records = positions
            .iter()
            .map(|&(lat, lon)| Transmitter::new(lat, lon, 98.0, 100.0).unwrap())
            .collect();
        TransmitterTable::prepare(records, tess, &axis).unwrap()
    }

    #[test]
    fn disc_contains_its_centre() {
        let tess = Tessellation::new(4).unwrap();
        for pixel in tess.pixel_ids() {
            assert!(disc_membership(&tess, tess.vector(pixel), 0.3).contains(&pixel));
        }
    }

    #[test]
    fn visible_rows_keep_table_order() {
        let tess = Tessellation::new(4).unwrap();
        let centre = tess.lonlat_to_pixel(20.0, 10.0);
        let disc = disc_membership(&tess, tess.vector(centre), 0.4);
        let neighbour = *disc.iter().find(|&&p| p != centre).unwrap();
        let far = tess.lonlat_to_pixel(200.0, -10.0);

        let at = |p: usize| (90.0 - tess.colatitudes()[p], tess.longitudes()[p]);
        let table = table(&tess, &[at(neighbour), at(far), at(centre), at(neighbour), at(centre)]);

        assert_eq!(visible_transmitters(&table, &disc), vec![0, 2, 3, 4]);
    }

    #[test]
    fn nothing_visible_from_the_far_side() {
        let tess = Tessellation::new(4).unwrap();
        let table = table(&tess, &[(0.0, 0.0)]);
        let far = tess.lonlat_to_pixel(180.0, 0.0);
        let disc = disc_membership(&tess, tess.vector(far), 0.39);
        assert!(visible_transmitters(&table, &disc).is_empty());
    }

    #[test]
    fn visibility_widens_with_altitude() {
        let tess = Tessellation::new(4).unwrap();
        let table = table(&tess, &[(0.0, 0.0), (40.0, 30.0), (-60.0, 250.0)]);
        let alts = Altitudes::from_values(vec![500.0, 36_000.0]).unwrap();
        let geometries = fov_geometries(&alts, EARTH_RADIUS_KM);
        let vis = Visibility::resolve(&tess, &geometries, &table);

        let count = |k: usize| -> usize {
            tess.pixel_ids().map(|p| vis.visible(k, p).len()).sum()
        };
        assert!(count(1) > count(0));

        for pixel in tess.pixel_ids() {
            let low = vis.visible(0, pixel);
            let high = vis.visible(1, pixel);
            assert!(low.iter().all(|row| high.contains(row)));
        }

        let home = table.pixel(0);
        assert!(vis.visible(0, home).contains(&0));
    }
}
