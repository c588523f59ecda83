//! FM transmitter records, database ingestion, and the prepared table.
//!
//! The database is a directory of CSV files, one per country, named after the
//! country (`Germany.csv`, `South_Africa.csv`, ...). Each file carries at
//! least these columns:
//!
//! | column                 | unit                          |
//! |------------------------|-------------------------------|
//! | `Latitude in degrees`  | degrees, -90 (S) to 90 (N)    |
//! | `Longitude in degrees` | degrees, 0 to 360 eastwards   |
//! | `Frequency(MHz)`       | MHz                           |
//! | `EIRP`                 | watts                         |
//!
//! Other columns are ignored. Rows without a latitude are dropped, any other
//! missing or unphysical value is an error.

use crate::error::{Error, Result};
use crate::frequency::FrequencyAxis;
use crate::healpix::Tessellation;
use geo::Point;
use serde::Deserialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// One FM transmitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transmitter {
    /// Where it is: x is longitude, y is latitude, both in degrees.
    pub position: Point<f64>,

    /// Carrier frequency (MHz).
    pub frequency_mhz: f64,

    /// Effective isotropic radiated power (W).
    pub eirp_w: f64,
}

impl Transmitter {
    pub fn new(latitude: f64, longitude: f64, frequency_mhz: f64, eirp_w: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidInput(format!(
                "latitude {} is outside -90..90",
                latitude
            )));
        }

        if !longitude.is_finite() {
            return Err(Error::InvalidInput(format!("longitude {} is not finite", longitude)));
        }

        if !(frequency_mhz > 0.0) || !frequency_mhz.is_finite() {
            return Err(Error::InvalidInput(format!(
                "frequency must be positive, got {} MHz",
                frequency_mhz
            )));
        }

        if !(eirp_w > 0.0) || !eirp_w.is_finite() {
            return Err(Error::InvalidInput(format!(
                "EIRP must be positive, got {} W",
                eirp_w
            )));
        }

        Ok(Self {
            position: Point::new(longitude, latitude),
            frequency_mhz,
            eirp_w,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.position.y()
    }

    pub fn longitude(&self) -> f64 {
        self.position.x()
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Latitude in degrees")]
    latitude: Option<f64>,

    #[serde(rename = "Longitude in degrees")]
    longitude: Option<f64>,

    #[serde(rename = "Frequency(MHz)")]
    frequency: Option<f64>,

    #[serde(rename = "EIRP")]
    eirp: Option<f64>,
}

/// Reads transmitters from CSV text with the database columns.
pub fn read_csv<R: io::Read>(reader: R) -> Result<Vec<Transmitter>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut dropped = 0;
    for (i, row) in csv.deserialize::<Row>().enumerate() {
        let row = row?;
        let line = i + 2; // header is line 1

        let latitude = match row.latitude {
            Some(lat) if !lat.is_nan() => lat,
            _ => {
                dropped += 1;
                continue;
            }
        };

        let field = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| Error::InvalidInput(format!("line {}: missing {}", line, name)))
        };

        let tx = Transmitter::new(
            latitude,
            field(row.longitude, "longitude")?,
            field(row.frequency, "frequency")?,
            field(row.eirp, "EIRP")?,
        )
        .map_err(|err| Error::InvalidInput(format!("line {}: {}", line, err)))?;
        records.push(tx);
    }

    debug!(kept = records.len(), dropped, "read transmitter rows");
    Ok(records)
}

/// Reads one CSV file of transmitters.
pub fn read_csv_file(path: &Path) -> Result<Vec<Transmitter>> {
    read_csv(File::open(path)?)
}

/// Which countries of a database to load.
#[derive(Clone, Debug, PartialEq)]
pub enum CountrySelection {
    All,
    Named(Vec<String>),
}

impl FromStr for CountrySelection {
    type Err = Error;

    /// `all` (any case) or a comma-separated list of country names.
    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CountrySelection::All);
        }

        let names: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();

        if names.is_empty() {
            return Err(Error::InvalidInput("no country selected".into()));
        }

        Ok(CountrySelection::Named(names))
    }
}

/// A directory of per-country transmitter files.
#[derive(Clone, Debug)]
pub struct Database {
    dir: PathBuf,
}

impl Database {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "transmitter database {} is not a directory",
                dir.display()
            )));
        }

        Ok(Self { dir })
    }

    /// Country names available, sorted.
    pub fn countries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Concatenates the selected countries' tables, in selection order.
    ///
    /// `All` loads every country in sorted name order.
    pub fn load(&self, selection: &CountrySelection) -> Result<Vec<Transmitter>> {
        let names = match selection {
            CountrySelection::All => self.countries()?,
            CountrySelection::Named(names) => names.clone(),
        };

        let mut records = Vec::new();
        for name in &names {
            let path = self.dir.join(format!("{}.csv", name));
            if !path.is_file() {
                return Err(Error::InvalidInput(format!(
                    "country {:?} is not in the database at {}",
                    name,
                    self.dir.display()
                )));
            }

            let mut rows = read_csv_file(&path)?;
            info!(country = name.as_str(), transmitters = rows.len(), "loaded country");
            records.append(&mut rows);
        }

        Ok(records)
    }
}

/// Transmitters with their tessellation pixel and frequency bin resolved.
///
/// Row order is the order records were given in and is kept throughout.
#[derive(Clone, Debug, PartialEq)]
pub struct TransmitterTable {
    records: Vec<Transmitter>,
    pixels: Vec<usize>,
    bins: Vec<usize>,
}

impl TransmitterTable {
    /// Assigns each record its pixel and its nearest frequency bin.
    pub fn prepare(
        records: Vec<Transmitter>,
        tess: &Tessellation,
        axis: &FrequencyAxis,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::EmptyTransmitterTable);
        }

        let pixels = records
            .iter()
            .map(|tx| tess.lonlat_to_pixel(tx.longitude(), tx.latitude()))
            .collect();
        let bins: Vec<usize> = records
            .iter()
            .map(|tx| axis.nearest_bin(tx.frequency_mhz))
            .collect();

        let (first, last) = (axis.values()[0], axis.values()[axis.len() - 1]);
        let outside = records
            .iter()
            .filter(|tx| tx.frequency_mhz < first - axis.step() || tx.frequency_mhz > last + axis.step())
            .count();
        if outside > 0 {
            debug!(outside, "transmitters beyond the frequency axis snapped to its edge bins");
        }

        Ok(Self {
            records,
            pixels,
            bins,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Transmitter] {
        &self.records
    }

    /// Tessellation pixel of a transmitter.
    pub fn pixel(&self, transmitter: usize) -> usize {
        self.pixels[transmitter]
    }

    /// Frequency-axis bin of a transmitter.
    pub fn bin(&self, transmitter: usize) -> usize {
        self.bins[transmitter]
    }

    pub fn pixels(&self) -> &[usize] {
        &self.pixels
    }
}
