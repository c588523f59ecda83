//! Beam-weighted aggregation into the power cube, and queries on the result.

use crate::beam::BeamPattern;
use crate::cache::write_atomically;
use crate::error::{Error, Result};
use crate::fov::Visibility;
use crate::frequency::{nearest_bin, FrequencyAxis};
use crate::friis::PowerMatrix;
use crate::geometry::ElevationTensor;
use crate::healpix::Tessellation;
use crate::transmitter::TransmitterTable;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

const MAGIC: &[u8; 8] = b"SKYFMCUB";
const VERSION: u32 = 1;

/// Magic, version and the three counts.
const HEADER_LEN: u64 = 8 + 4 + 3 * 8;

/// Equivalent temperature (K) over `[altitude][pixel][frequency bin]`.
///
/// Dense and flat: every (altitude, pixel) cell owns a full-length frequency
/// vector, all zeros where nothing is visible.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerCube {
    altitudes: Vec<f64>,
    frequencies: Vec<f64>,
    npix: usize,
    data: Vec<f64>,
}

impl PowerCube {
    /// Sums every visible transmitter's beam-weighted temperature into its
    /// frequency bin, for every altitude and pixel.
    ///
    /// A cell is `Σ K(t, alt) × gain(elevation(alt, pixel, pixel(t)))` over the
    /// visible transmitters `t` in that bin. Transmitters sharing a bin add up.
    pub fn aggregate(
        table: &TransmitterTable,
        power: &PowerMatrix,
        elevations: &ElevationTensor,
        visibility: &Visibility,
        beam: BeamPattern,
        axis: &FrequencyAxis,
    ) -> Self {
        let npix = elevations.pixel_count();
        let bins = axis.len();
        let altitudes = elevations.altitudes().to_vec();
        let mut data = vec![0.0; altitudes.len() * npix * bins];

        for (k, slab) in data.chunks_mut(npix * bins).enumerate() {
            slab.par_chunks_mut(bins)
                .enumerate()
                .for_each(|(pixel, spectrum)| {
                    let row = elevations.row(k, pixel);
                    for &t in visibility.visible(k, pixel) {
                        let gain = beam.gain(row[table.pixel(t)]);
                        spectrum[table.bin(t)] += power.kelvin(t, k) * gain;
                    }
                });

            debug!(altitude_km = altitudes[k], index = k, "aggregated altitude");
        }

        Self {
            altitudes,
            frequencies: axis.values().to_vec(),
            npix,
            data,
        }
    }

    /// `(altitudes, pixels, frequency bins)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.altitudes.len(), self.npix, self.frequencies.len())
    }

    pub fn altitudes(&self) -> &[f64] {
        &self.altitudes
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn pixel_count(&self) -> usize {
        self.npix
    }

    pub fn get(&self, altitude: usize, pixel: usize, bin: usize) -> Result<f64> {
        let spectrum = self.spectrum(altitude, pixel)?;
        check("frequency", bin, spectrum.len())?;
        Ok(spectrum[bin])
    }

    /// Frequency vector above one pixel at one altitude.
    pub fn spectrum(&self, altitude: usize, pixel: usize) -> Result<&[f64]> {
        check("altitude", altitude, self.altitudes.len())?;
        check("pixel", pixel, self.npix)?;

        let bins = self.frequencies.len();
        let start = (altitude * self.npix + pixel) * bins;
        Ok(&self.data[start..start + bins])
    }

    /// Per-pixel values of one frequency bin at one altitude.
    pub fn map(&self, altitude: usize, bin: usize) -> Result<Vec<f64>> {
        check("altitude", altitude, self.altitudes.len())?;
        check("frequency", bin, self.frequencies.len())?;

        Ok(self
            .slab(altitude)
            .chunks(self.frequencies.len())
            .map(|spectrum| spectrum[bin])
            .collect())
    }

    /// Per-pixel sum over the whole frequency axis at one altitude.
    pub fn total_map(&self, altitude: usize) -> Result<Vec<f64>> {
        check("altitude", altitude, self.altitudes.len())?;

        Ok(self
            .slab(altitude)
            .chunks(self.frequencies.len())
            .map(|spectrum| spectrum.iter().sum())
            .collect())
    }

    /// Index of an altitude of the cube, which must match exactly.
    pub fn altitude_index(&self, altitude_km: f64) -> Result<usize> {
        self.altitudes
            .iter()
            .position(|&a| a == altitude_km)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "altitude {} km is not in the cube, which has {:?}",
                    altitude_km, self.altitudes
                ))
            })
    }

    /// Index of the bin nearest to a frequency within the axis span.
    pub fn frequency_index(&self, frequency_mhz: f64) -> Result<usize> {
        let (first, last) = match (self.frequencies.first(), self.frequencies.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Err(Error::InvalidInput("cube has no frequency bins".into())),
        };

        if !(frequency_mhz >= first && frequency_mhz <= last) {
            return Err(Error::InvalidInput(format!(
                "{} MHz lies outside the frequency axis {} to {} MHz",
                frequency_mhz, first, last
            )));
        }

        Ok(nearest_bin(frequency_mhz, &self.frequencies))
    }

    /// Pixel holding a ground position, on the tessellation the cube was built
    /// with.
    pub fn pixel_index(&self, tess: &Tessellation, latitude: f64, longitude: f64) -> Result<usize> {
        if tess.pixel_count() != self.npix {
            return Err(Error::InvalidInput(format!(
                "tessellation has {} pixels but the cube has {}",
                tess.pixel_count(),
                self.npix
            )));
        }

        if !(-90.0..=90.0).contains(&latitude) || !longitude.is_finite() {
            return Err(Error::InvalidInput(format!(
                "no pixel at latitude {}, longitude {}",
                latitude, longitude
            )));
        }

        Ok(tess.lonlat_to_pixel(longitude, latitude))
    }

    /// Writes the cube as little-endian binary.
    ///
    /// Layout: magic `SKYFMCUB`, u32 version, u64 counts of altitudes, pixels
    /// and bins, then altitudes, frequencies and the values, all f64.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomically(path, |w| self.write_to(w))
    }

    /// Reads a cube written by [`PowerCube::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut r = BufReader::new(file);
        Self::read_from(&mut r, len).map_err(|err| match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                Error::InvalidInput(format!("{}: {}", path.display(), err))
            }
            _ => Error::Io(err),
        })
    }

    fn slab(&self, altitude: usize) -> &[f64] {
        let len = self.npix * self.frequencies.len();
        &self.data[altitude * len..(altitude + 1) * len]
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(VERSION)?;
        w.write_u64::<LittleEndian>(self.altitudes.len() as u64)?;
        w.write_u64::<LittleEndian>(self.npix as u64)?;
        w.write_u64::<LittleEndian>(self.frequencies.len() as u64)?;
        for &value in self.altitudes.iter().chain(&self.frequencies).chain(&self.data) {
            w.write_f64::<LittleEndian>(value)?;
        }
        Ok(())
    }

    /// Reads a cube from a stream of `len` bytes. Counts in the header are
    /// checked against `len` before anything is allocated.
    fn read_from<R: Read>(r: &mut R, len: u64) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("not a power cube file".into()));
        }

        let version = r.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(invalid(format!("unsupported cube version {}", version)));
        }

        let n_alt = r.read_u64::<LittleEndian>()? as usize;
        let npix = r.read_u64::<LittleEndian>()? as usize;
        let bins = r.read_u64::<LittleEndian>()? as usize;

        let values = n_alt
            .checked_mul(npix)
            .and_then(|n| n.checked_mul(bins))
            .and_then(|n| n.checked_add(n_alt))
            .and_then(|n| n.checked_add(bins))
            .and_then(|n| (n as u64).checked_mul(8));
        let remaining = len.saturating_sub(HEADER_LEN);
        if values != Some(remaining) {
            return Err(invalid(format!(
                "header claims {} altitudes × {} pixels × {} bins, which does not fit {} bytes of data",
                n_alt, npix, bins, remaining
            )));
        }

        let mut altitudes = vec![0.0; n_alt];
        r.read_f64_into::<LittleEndian>(&mut altitudes)?;
        let mut frequencies = vec![0.0; bins];
        r.read_f64_into::<LittleEndian>(&mut frequencies)?;
        let mut data = vec![0.0; n_alt * npix * bins];
        r.read_f64_into::<LittleEndian>(&mut data)?;

        let mut rest = [0u8; 1];
        if r.read(&mut rest)? != 0 {
            return Err(invalid("trailing bytes after cube data".into()));
        }

        Ok(Self {
            altitudes,
            frequencies,
            npix,
            data,
        })
    }
}

fn check(axis: &'static str, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::OutOfRange { axis, index, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friis::DEFAULT_CHANNEL_BANDWIDTH_HZ;
    use crate::geometry::{fov_geometries, Altitudes, EARTH_RADIUS_KM};
    use crate::transmitter::Transmitter;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    struct Fixture {
        tess: Tessellation,
        table: TransmitterTable,
        cube: PowerCube,
    }

    fn build(records: Vec<Transmitter>, beam: BeamPattern) -> Fixture {
        let tess = Tessellation::new(4).unwrap();
        let axis = FrequencyAxis::new(89.8, 90.7, 0.2).unwrap();
        let alts = Altitudes::from_values(vec![500.0, 2_000.0]).unwrap();

        let table = TransmitterTable::prepare(records, &tess, &axis).unwrap();
        let elevations = ElevationTensor::compute(&tess, &alts, EARTH_RADIUS_KM);
        let visibility = Visibility::resolve(&tess, &fov_geometries(&alts, EARTH_RADIUS_KM), &table);
        let power = PowerMatrix::compute(&table, alts.as_slice(), DEFAULT_CHANNEL_BANDWIDTH_HZ).unwrap();
        let cube = PowerCube::aggregate(&table, &power, &elevations, &visibility, beam, &axis);

        Fixture { tess, table, cube }
    }

    #[test]
    fn shared_bins_sum() {
        let one = build(vec![Transmitter::new(0.0, 0.0, 90.0, 1000.0).unwrap()], BeamPattern::SinSquare);
        let two = build(
            vec![
                Transmitter::new(0.0, 0.0, 90.0, 1000.0).unwrap(),
                Transmitter::new(0.0, 0.0, 90.03, 1000.0).unwrap(),
            ],
            BeamPattern::SinSquare,
        );

        let home = one.table.pixel(0);
        let single = one.cube.get(0, home, 1).unwrap();
        assert!(single > 0.0);

        // same bin, slightly different carrier: a bit less than double
        let double = two.cube.get(0, home, 1).unwrap();
        assert!(double > 1.99 * single && double < 2.0 * single);
    }

    #[test]
    fn empty_cells_are_zero_vectors() {
        let f = build(vec![Transmitter::new(0.0, 0.0, 90.0, 1000.0).unwrap()], BeamPattern::CosSquare);
        let far = f.tess.lonlat_to_pixel(180.0, 0.0);

        assert_eq!(f.cube.shape(), (2, 192, 5));
        assert!(f.cube.spectrum(0, far).unwrap().iter().all(|&v| v == 0.0));
        assert!(f.cube.spectrum(1, far).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn maps_and_spectra_agree() {
        let f = build(
            vec![
                Transmitter::new(10.0, 5.0, 90.0, 1000.0).unwrap(),
                Transmitter::new(-5.0, 355.0, 90.4, 3000.0).unwrap(),
            ],
            BeamPattern::CosSquare,
        );

        for k in 0..2 {
            let totals = f.cube.total_map(k).unwrap();
            for bin in 0..5 {
                let map = f.cube.map(k, bin).unwrap();
                for pixel in f.tess.pixel_ids() {
                    assert_eq!(map[pixel], f.cube.spectrum(k, pixel).unwrap()[bin]);
                }
            }
            for pixel in f.tess.pixel_ids() {
                let sum: f64 = f.cube.spectrum(k, pixel).unwrap().iter().sum();
                assert_relative_eq!(totals[pixel], sum);
            }
        }
    }

    #[test]
    fn queries_check_their_indices() {
        let f = build(vec![Transmitter::new(0.0, 0.0, 90.0, 1000.0).unwrap()], BeamPattern::CosSquare);

        assert!(matches!(f.cube.spectrum(2, 0), Err(Error::OutOfRange { axis: "altitude", .. })));
        assert!(matches!(f.cube.spectrum(0, 192), Err(Error::OutOfRange { axis: "pixel", .. })));
        assert!(matches!(f.cube.map(0, 5), Err(Error::OutOfRange { axis: "frequency", .. })));
        assert!(f.cube.get(0, 0, 4).is_ok());

        assert_eq!(f.cube.altitude_index(2_000.0).unwrap(), 1);
        assert!(f.cube.altitude_index(1_999.0).is_err());

        assert_eq!(f.cube.frequency_index(90.05).unwrap(), 1);
        assert_eq!(f.cube.frequency_index(90.1).unwrap(), 1);
        assert!(f.cube.frequency_index(91.0).is_err());

        assert_eq!(f.cube.pixel_index(&f.tess, 0.0, 0.0).unwrap(), f.table.pixel(0));
        assert!(f.cube.pixel_index(&f.tess, 95.0, 0.0).is_err());
        assert!(f.cube.pixel_index(&Tessellation::new(2).unwrap(), 0.0, 0.0).is_err());
    }

    #[test]
    fn saved_cube_loads_back() {
        let f = build(vec![Transmitter::new(30.0, 60.0, 90.2, 800.0).unwrap()], BeamPattern::CosSquare);
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.bin");

        f.cube.save(&path).unwrap();
        assert_eq!(PowerCube::load(&path).unwrap(), f.cube);

        std::fs::write(&path, b"SKYFMCUB\x01\x00").unwrap();
        assert!(matches!(PowerCube::load(&path), Err(Error::InvalidInput(_))));
        assert!(matches!(PowerCube::load(&dir.path().join("nope.bin")), Err(Error::Io(_))));
    }

    #[test]
    fn header_counts_must_fit_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.bin");

        let header = |counts: [u64; 3]| {
            let mut bytes = MAGIC.to_vec();
            bytes.write_u32::<LittleEndian>(VERSION).unwrap();
            for &n in &counts {
                bytes.write_u64::<LittleEndian>(n).unwrap();
            }
            bytes
        };

        // huge counts, no data: refused before allocating
        std::fs::write(&path, header([1 << 32; 3])).unwrap();
        assert!(matches!(PowerCube::load(&path), Err(Error::InvalidInput(_))));

        // counts whose product overflows
        std::fs::write(&path, header([u64::MAX, 2, 3])).unwrap();
        assert!(matches!(PowerCube::load(&path), Err(Error::InvalidInput(_))));

        // one value short
        let mut short = header([1, 1, 1]);
        short.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, &short).unwrap();
        assert!(matches!(PowerCube::load(&path), Err(Error::InvalidInput(_))));

        // and exactly right
        short.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, &short).unwrap();
        assert_eq!(PowerCube::load(&path).unwrap().shape(), (1, 1, 1));
    }
}
