#![forbid(unsafe_code)]
#![cfg_attr(feature = "cargo-clippy", deny(clippy_pedantic))]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use cube::healpix::Tessellation;
use cube::{CountrySelection, Database, PowerCube, Settings, Simulation, Validated};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// FM broadcast interference seen from orbit.
#[derive(Debug, Parser)]
#[command(name = "skyfm", version)]
struct Cli {
    /// More logging: -v for debug, -vv for trace. Overrides RUST_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the power cube and write it out.
    Run {
        #[command(flatten)]
        source: Source,

        /// Where to write the cube.
        #[arg(short, long, default_value = "cube.bin")]
        output: PathBuf,
    },

    /// Export the spectrum above one place at one altitude, as CSV.
    Spectrum {
        #[command(flatten)]
        cube: CubeSource,

        /// Altitude of the cube (km), exactly as configured.
        #[arg(long)]
        altitude: f64,

        /// Latitude in degrees, north positive.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees, east positive.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// CSV file to write. Standard output when absent.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a per-pixel map at one altitude, as CSV.
    Map {
        #[command(flatten)]
        cube: CubeSource,

        /// Altitude of the cube (km), exactly as configured.
        #[arg(long)]
        altitude: f64,

        /// Frequency (MHz) of the bin to map. Sums over all bins when absent.
        #[arg(long)]
        frequency: Option<f64>,

        /// CSV file to write. Standard output when absent.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the countries of a transmitter database.
    Countries {
        /// Directory of per-country CSV files.
        #[arg(short, long)]
        database: PathBuf,
    },
}

/// Parameters and transmitters of a run.
#[derive(Debug, Args)]
struct Source {
    /// YAML settings file. Built-in defaults when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of per-country CSV files.
    #[arg(short, long)]
    database: PathBuf,

    /// Comma-separated country names, or "all".
    #[arg(long, default_value = "all")]
    countries: String,

    /// Elevation cache directory, overriding the settings file.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

/// A fresh run, or a cube saved by an earlier one.
#[derive(Debug, Args)]
struct CubeSource {
    /// YAML settings file. Built-in defaults when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of per-country CSV files. Required without --cube.
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Comma-separated country names, or "all".
    #[arg(long, default_value = "all")]
    countries: String,

    /// Elevation cache directory, overriding the settings file.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Read this saved cube instead of running. Its resolution must match the
    /// settings.
    #[arg(long, conflicts_with = "database")]
    cube: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run { source, output } => {
            let params = load_params(source.config.as_deref(), source.cache_dir.clone())?;
            let sim = simulate(&params, &source.database, &source.countries)?;
            sim.cube
                .save(&output)
                .with_context(|| format!("writing cube to {}", output.display()))?;
            info!(path = %output.display(), "cube written");
        }

        Command::Spectrum {
            cube,
            altitude,
            lat,
            lon,
            output,
        } => {
            let (params, cube) = obtain_cube(&cube)?;
            let a = cube.altitude_index(altitude)?;
            let pixel = cube.pixel_index(&params.tessellation, lat, lon)?;
            let spectrum = cube.spectrum(a, pixel)?;

            let mut csv = csv_writer(output.as_deref())?;
            csv.write_record(&["frequency_mhz", "kelvin"])?;
            for (f, k) in cube.frequencies().iter().zip(spectrum) {
                csv.write_record(&[f.to_string(), k.to_string()])?;
            }
            csv.flush()?;
            info!(pixel, altitude_km = altitude, "spectrum exported");
        }

        Command::Map {
            cube,
            altitude,
            frequency,
            output,
        } => {
            let (params, cube) = obtain_cube(&cube)?;
            let a = cube.altitude_index(altitude)?;
            let values = match frequency {
                Some(mhz) => {
                    let bin = cube.frequency_index(mhz)?;
                    info!(
                        requested_mhz = mhz,
                        bin_mhz = cube.frequencies()[bin],
                        "mapping nearest bin"
                    );
                    cube.map(a, bin)?
                }
                None => cube.total_map(a)?,
            };

            write_map(output.as_deref(), &params.tessellation, &values)?;
            info!(altitude_km = altitude, "map exported");
        }

        Command::Countries { database } => {
            let db = Database::open(&database)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for name in db.countries()? {
                writeln!(out, "{}", name)?;
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Reads and validates settings before anything is computed.
fn load_params(config: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<Validated> {
    let mut settings = match config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    if cache_dir.is_some() {
        settings.cache_dir = cache_dir;
    }

    settings.validate().context("invalid settings")
}

fn simulate(params: &Validated, database: &Path, countries: &str) -> Result<Simulation> {
    let selection: CountrySelection = countries.parse()?;
    let db = Database::open(database)?;
    let transmitters = db
        .load(&selection)
        .with_context(|| format!("loading transmitters from {}", database.display()))?;

    Ok(Simulation::run(params, transmitters)?)
}

fn obtain_cube(source: &CubeSource) -> Result<(Validated, PowerCube)> {
    let params = load_params(source.config.as_deref(), source.cache_dir.clone())?;

    let cube = match (&source.cube, &source.database) {
        (Some(path), _) => {
            let cube = PowerCube::load(path)
                .with_context(|| format!("reading cube from {}", path.display()))?;
            if cube.pixel_count() != params.tessellation.pixel_count() {
                bail!(
                    "cube {} has {} pixels, the settings give {}",
                    path.display(),
                    cube.pixel_count(),
                    params.tessellation.pixel_count()
                );
            }
            cube
        }
        (None, Some(database)) => simulate(&params, database, &source.countries)?.cube,
        (None, None) => bail!("either --database or --cube is needed"),
    };

    Ok((params, cube))
}

fn csv_writer(output: Option<&Path>) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    Ok(csv::Writer::from_writer(sink))
}

fn write_map(output: Option<&Path>, tess: &Tessellation, values: &[f64]) -> Result<()> {
    let mut csv = csv_writer(output)?;
    csv.write_record(&["pixel", "latitude", "longitude", "kelvin"])?;
    for (pixel, value) in values.iter().enumerate() {
        let latitude = 90.0 - tess.colatitudes()[pixel];
        let longitude = tess.longitudes()[pixel];
        csv.write_record(&[
            pixel.to_string(),
            latitude.to_string(),
            longitude.to_string(),
            value.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}
