//! On-disk cache of elevation tensors.
//!
//! A tensor depends on the tessellation's pixel count, the altitude set and
//! the Earth radius, and nothing else. Those three make up the cache key. The
//! file name carries a digest of the key for lookup; the file header carries
//! the key in full and is compared on load, so a digest collision or a stale
//! file can only ever cause a recomputation.
//!
//! File layout, all little-endian:
//!
//! ```text
//! magic      8 bytes   "SKYFMELV"
//! version    u32
//! npix       u64
//! radius     f64       earth radius (km)
//! n_alt      u64
//! altitudes  f64 × n_alt
//! data       f64 × n_alt × npix × npix
//! ```
//!
//! Files are written to a temporary sibling and renamed into place once
//! complete. Concurrent writers for the same key each produce a whole file and
//! the last rename wins; readers never see a partial write.

use crate::error::{Error, Result};
use crate::geometry::{Altitudes, ElevationTensor};
use crate::healpix::Tessellation;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 8] = b"SKYFMELV";
const VERSION: u32 = 1;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Identity of an elevation tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheKey {
    pub npix: usize,
    pub altitudes: Vec<f64>,
    pub earth_radius_km: f64,
}

impl CacheKey {
    pub fn new(npix: usize, altitudes: &[f64], earth_radius_km: f64) -> Self {
        Self {
            npix,
            altitudes: altitudes.to_vec(),
            earth_radius_km,
        }
    }

    fn of(tensor: &ElevationTensor) -> Self {
        Self::new(tensor.pixel_count(), tensor.altitudes(), tensor.earth_radius_km())
    }

    /// Short digest of the key: 64-bit FNV-1a over the little-endian bytes of
    /// pixel count, earth radius, altitude count and altitudes.
    ///
    /// The digest names files on disk, so it must not change between builds.
    pub fn digest(&self) -> u64 {
        let mut bytes = Vec::with_capacity(8 * (3 + self.altitudes.len()));
        bytes.extend_from_slice(&(self.npix as u64).to_le_bytes());
        bytes.extend_from_slice(&self.earth_radius_km.to_bits().to_le_bytes());
        bytes.extend_from_slice(&(self.altitudes.len() as u64).to_le_bytes());
        for altitude in &self.altitudes {
            bytes.extend_from_slice(&altitude.to_bits().to_le_bytes());
        }

        bytes.iter().fold(FNV_OFFSET, |hash, &b| {
            (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
        })
    }

    pub fn file_name(&self) -> String {
        format!(
            "elevation-{}px-{}alt-{:016x}.bin",
            self.npix,
            self.altitudes.len(),
            self.digest()
        )
    }

    fn same_as(&self, other: &CacheKey) -> bool {
        self.npix == other.npix
            && self.earth_radius_km.to_bits() == other.earth_radius_km.to_bits()
            && self.altitudes.len() == other.altitudes.len()
            && self
                .altitudes
                .iter()
                .zip(&other.altitudes)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// A directory of cached elevation tensors.
#[derive(Clone, Debug)]
pub struct ElevationCache {
    dir: PathBuf,
}

impl ElevationCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Loads the tensor for `key`.
    ///
    /// Returns `Ok(None)` when nothing is cached, and `CacheCorruption` when a
    /// file exists but is unreadable or describes another tensor.
    pub fn load(&self, key: &CacheKey) -> Result<Option<ElevationTensor>> {
        let path = self.path_for(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::cache(&path, err.to_string())),
        };

        read_tensor(BufReader::new(file), key, &path).map(Some)
    }

    /// Writes a tensor atomically, returning where it went.
    pub fn store(&self, tensor: &ElevationTensor) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&CacheKey::of(tensor));
        write_atomically(&path, |w| write_tensor(w, tensor))?;
        info!(path = %path.display(), "stored elevation cache");
        Ok(path)
    }

    /// Loads the tensor if cached, else computes and stores it.
    ///
    /// A damaged cache file is replaced. Failure to write the cache is logged
    /// and otherwise ignored: the computed tensor is still returned.
    pub fn load_or_compute(
        &self,
        tess: &Tessellation,
        altitudes: &Altitudes,
        earth_radius_km: f64,
    ) -> Result<ElevationTensor> {
        let key = CacheKey::new(tess.pixel_count(), altitudes.as_slice(), earth_radius_km);

        match self.load(&key) {
            Ok(Some(tensor)) => {
                info!(path = %self.path_for(&key).display(), "elevation cache hit");
                return Ok(tensor);
            }
            Ok(None) => debug!(path = %self.path_for(&key).display(), "elevation cache miss"),
            Err(err) if err.is_recoverable() => warn!(%err, "recomputing elevation angles"),
            Err(err) => return Err(err),
        }

        let tensor = ElevationTensor::compute(tess, altitudes, earth_radius_km);
        if let Err(err) = self.store(&tensor) {
            warn!(%err, "could not write elevation cache");
        }

        Ok(tensor)
    }
}

/// Writes `path` through a temporary file in the same directory, renaming it
/// into place only once `write` has succeeded and the data is synced.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn write_tensor(w: &mut dyn Write, tensor: &ElevationTensor) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(tensor.pixel_count() as u64)?;
    w.write_f64::<LittleEndian>(tensor.earth_radius_km())?;
    w.write_u64::<LittleEndian>(tensor.altitudes().len() as u64)?;
    for &altitude in tensor.altitudes() {
        w.write_f64::<LittleEndian>(altitude)?;
    }
    for &value in tensor.as_slice() {
        w.write_f64::<LittleEndian>(value)?;
    }
    Ok(())
}

fn read_tensor<R: Read>(mut r: R, key: &CacheKey, path: &Path) -> Result<ElevationTensor> {
    let corrupt = |reason: String| Error::cache(path, reason);
    let io_err = |err: io::Error| Error::cache(path, err.to_string());

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).map_err(io_err)?;
    if &magic != MAGIC {
        return Err(corrupt("not an elevation cache file".into()));
    }

    let version = r.read_u32::<LittleEndian>().map_err(io_err)?;
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }

    let npix = r.read_u64::<LittleEndian>().map_err(io_err)? as usize;
    let earth_radius_km = r.read_f64::<LittleEndian>().map_err(io_err)?;
    let n_alt = r.read_u64::<LittleEndian>().map_err(io_err)? as usize;
    if n_alt != key.altitudes.len() || npix != key.npix {
        return Err(corrupt(format!(
            "shape {} altitudes × {} pixels, expected {} × {}",
            n_alt,
            npix,
            key.altitudes.len(),
            key.npix
        )));
    }

    let mut altitudes = vec![0.0; n_alt];
    r.read_f64_into::<LittleEndian>(&mut altitudes).map_err(io_err)?;
    let found = CacheKey::new(npix, &altitudes, earth_radius_km);
    if !found.same_as(key) {
        return Err(corrupt("altitudes or earth radius differ from the requested ones".into()));
    }

    let mut data = vec![0.0; n_alt * npix * npix];
    r.read_f64_into::<LittleEndian>(&mut data).map_err(io_err)?;

    let mut rest = [0u8; 1];
    if r.read(&mut rest).map_err(io_err)? != 0 {
        return Err(corrupt("trailing bytes after tensor data".into()));
    }

    ElevationTensor::from_parts(npix, altitudes, earth_radius_km, data)
        .ok_or_else(|| corrupt("tensor length does not match its header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::EARTH_RADIUS_KM;
    use tempfile::tempdir;

    fn setup() -> (Tessellation, Altitudes) {
        (
            Tessellation::new(2).unwrap(),
            Altitudes::log_spaced(400.0, 36_000.0, 3).unwrap(),
        )
    }

    #[test]
    fn key_depends_on_every_part() {
        let base = CacheKey::new(192, &[500.0, 800.0], EARTH_RADIUS_KM);
        let others = [
            CacheKey::new(768, &[500.0, 800.0], EARTH_RADIUS_KM),
            CacheKey::new(192, &[500.0, 800.1], EARTH_RADIUS_KM),
            CacheKey::new(192, &[500.0], EARTH_RADIUS_KM),
            CacheKey::new(192, &[500.0, 800.0], 6371.0),
        ];
        for other in &others {
            assert_ne!(base.file_name(), other.file_name());
            assert!(!base.same_as(other));
        }
        assert_eq!(base.file_name(), CacheKey::new(192, &[500.0, 800.0], EARTH_RADIUS_KM).file_name());
    }

    #[test]
    fn file_names_are_stable() {
        let key = CacheKey::new(192, &[500.0], EARTH_RADIUS_KM);
        assert_eq!(key.digest(), 0x4939_03ce_d418_6897);
        assert_eq!(key.file_name(), "elevation-192px-1alt-493903ced4186897.bin");
    }

    #[test]
    fn stored_tensor_is_found_again() {
        let dir = tempdir().unwrap();
        let cache = ElevationCache::new(dir.path().join("nested"));
        let (tess, alts) = setup();
        let key = CacheKey::new(tess.pixel_count(), alts.as_slice(), EARTH_RADIUS_KM);

        assert!(cache.load(&key).unwrap().is_none());

        let tensor = ElevationTensor::compute(&tess, &alts, EARTH_RADIUS_KM);
        let path = cache.store(&tensor).unwrap();
        assert_eq!(path, cache.path_for(&key));

        assert_eq!(cache.load(&key).unwrap(), Some(tensor));

        // no temporary files are left behind
        let files = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn damaged_files_are_reported_as_corruption() {
        let dir = tempdir().unwrap();
        let cache = ElevationCache::new(dir.path());
        let (tess, alts) = setup();
        let key = CacheKey::new(tess.pixel_count(), alts.as_slice(), EARTH_RADIUS_KM);
        let tensor = ElevationTensor::compute(&tess, &alts, EARTH_RADIUS_KM);
        let path = cache.store(&tensor).unwrap();
        let good = fs::read(&path).unwrap();

        // truncated
        fs::write(&path, &good[..good.len() - 8]).unwrap();
        assert!(matches!(cache.load(&key), Err(Error::CacheCorruption { .. })));

        // garbage
        fs::write(&path, b"definitely not a tensor").unwrap();
        assert!(matches!(cache.load(&key), Err(Error::CacheCorruption { .. })));

        // trailing bytes
        let mut long = good.clone();
        long.extend_from_slice(&[0, 0, 0]);
        fs::write(&path, &long).unwrap();
        assert!(matches!(cache.load(&key), Err(Error::CacheCorruption { .. })));

        // a file for another key sitting under this key's name
        let other = ElevationTensor::compute(&tess, &Altitudes::from_values(vec![1.0, 2.0, 3.0]).unwrap(), EARTH_RADIUS_KM);
        let other_path = cache.store(&other).unwrap();
        fs::rename(&other_path, &path).unwrap();
        assert!(matches!(cache.load(&key), Err(Error::CacheCorruption { .. })));
    }

    #[test]
    fn load_or_compute_recovers_from_corruption() {
        let dir = tempdir().unwrap();
        let cache = ElevationCache::new(dir.path());
        let (tess, alts) = setup();
        let key = CacheKey::new(tess.pixel_count(), alts.as_slice(), EARTH_RADIUS_KM);
        let expected = ElevationTensor::compute(&tess, &alts, EARTH_RADIUS_KM);

        fs::write(cache.path_for(&key), b"SKYFMELV junk").unwrap();
        let tensor = cache.load_or_compute(&tess, &alts, EARTH_RADIUS_KM).unwrap();
        assert_eq!(tensor, expected);

        // and the bad file was replaced by a good one
        assert_eq!(cache.load(&key).unwrap(), Some(expected));
    }
}
