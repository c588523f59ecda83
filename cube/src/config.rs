//! Run parameters, read from YAML and validated once.
//!
//! ```yaml
//! resolution: 4
//! altitudes:
//!   min_km: 400
//!   max_km: 36000
//!   count: 3
//! frequencies:
//!   start_mhz: 55
//!   stop_mhz: 110
//!   step_mhz: 0.244
//! beam: cos square
//! channel_bandwidth_hz: 244000
//! earth_radius_km: 6378.1
//! cache_dir: /var/cache/skyfm
//! ```
//!
//! Every key is optional and falls back to the value shown, except
//! `cache_dir` which defaults to no caching. `altitudes.values` may list
//! altitudes explicitly instead of log-spacing them.

use crate::beam::BeamPattern;
use crate::error::{Error, Result};
use crate::frequency::FrequencyAxis;
use crate::friis::DEFAULT_CHANNEL_BANDWIDTH_HZ;
use crate::geometry::{Altitudes, EARTH_RADIUS_KM};
use crate::healpix::Tessellation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Tessellation `nside`.
    pub resolution: i64,
    pub altitudes: AltitudeSettings,
    pub frequencies: FrequencySettings,

    /// `"cos square"` or `"sin square"`.
    pub beam: String,

    /// Bandwidth of the Kelvin conversion. Should match the frequency step.
    pub channel_bandwidth_hz: f64,
    pub earth_radius_km: f64,

    /// Where elevation tensors are cached. No caching when absent.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: 4,
            altitudes: AltitudeSettings::default(),
            frequencies: FrequencySettings::default(),
            beam: BeamPattern::default().name().to_string(),
            channel_bandwidth_hz: DEFAULT_CHANNEL_BANDWIDTH_HZ,
            earth_radius_km: EARTH_RADIUS_KM,
            cache_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AltitudeSettings {
    pub min_km: f64,
    pub max_km: f64,
    pub count: usize,

    /// Explicit altitudes, overriding the three fields above.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
}

impl Default for AltitudeSettings {
    fn default() -> Self {
        Self {
            min_km: 400.0,
            max_km: 36_000.0,
            count: 3,
            values: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrequencySettings {
    pub start_mhz: f64,
    pub stop_mhz: f64,
    pub step_mhz: f64,
}

impl Default for FrequencySettings {
    fn default() -> Self {
        Self {
            start_mhz: 55.0,
            stop_mhz: 110.0,
            step_mhz: 0.244,
        }
    }
}

impl Settings {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;

        Self::parse(&content)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| Error::Config(err.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| Error::Config(err.to_string()))
    }

    /// Checks every parameter and builds the values the pipeline runs on.
    ///
    /// Errors early: the first bad parameter found is the one reported.
    pub fn validate(&self) -> Result<Validated> {
        let tessellation = Tessellation::new(self.resolution)?;

        let altitudes = match &self.altitudes.values {
            Some(values) => Altitudes::from_values(values.clone())?,
            None => Altitudes::log_spaced(
                self.altitudes.min_km,
                self.altitudes.max_km,
                self.altitudes.count,
            )?,
        };

        let frequencies = FrequencyAxis::new(
            self.frequencies.start_mhz,
            self.frequencies.stop_mhz,
            self.frequencies.step_mhz,
        )?;

        let beam = self.beam.parse::<BeamPattern>()?;

        if !(self.channel_bandwidth_hz > 0.0) || !self.channel_bandwidth_hz.is_finite() {
            return Err(Error::InvalidInput(format!(
                "channel bandwidth must be positive, got {} Hz",
                self.channel_bandwidth_hz
            )));
        }

        if !(self.earth_radius_km > 0.0) || !self.earth_radius_km.is_finite() {
            return Err(Error::InvalidInput(format!(
                "earth radius must be positive, got {} km",
                self.earth_radius_km
            )));
        }

        Ok(Validated {
            tessellation,
            altitudes,
            frequencies,
            beam,
            channel_bandwidth_hz: self.channel_bandwidth_hz,
            earth_radius_km: self.earth_radius_km,
            cache_dir: self.cache_dir.clone(),
        })
    }
}

/// Parameters that passed validation, in the form the pipeline consumes.
#[derive(Clone, Debug)]
pub struct Validated {
    pub tessellation: Tessellation,
    pub altitudes: Altitudes,
    pub frequencies: FrequencyAxis,
    pub beam: BeamPattern,
    pub channel_bandwidth_hz: f64,
    pub earth_radius_km: f64,
    pub cache_dir: Option<PathBuf>,
}

impl Validated {
    /// Whether the Kelvin bandwidth and the frequency step disagree.
    pub fn bandwidth_mismatch(&self) -> bool {
        let step_hz = self.frequencies.step() * 1e6;
        (self.channel_bandwidth_hz - step_hz).abs() > 1e-6 * step_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn empty_document_gives_defaults() {
        let settings = Settings::parse("{}").unwrap();
        assert_eq!(settings, Settings::default());

        let v = settings.validate().unwrap();
        assert_eq!(v.tessellation.pixel_count(), 192);
        let alts = v.altitudes.as_slice();
        assert_eq!(alts.len(), 3);
        assert_eq!((alts[0], alts[2]), (400.0, 36_000.0));
        assert_relative_eq!(alts[1], (400.0f64 * 36_000.0).sqrt(), max_relative = 1e-12);
        assert_eq!(v.frequencies.len(), 226);
        assert_eq!(v.beam, BeamPattern::CosSquare);
        assert!(!v.bandwidth_mismatch());
        assert!(v.cache_dir.is_none());
    }

    #[test]
    fn partial_document() {
        let yaml = "
resolution: 8
altitudes:
  values: [500, 1200]
frequencies:
  step_mhz: 0.1
beam: sin square
cache_dir: /tmp/elevations
";
        let v = Settings::parse(yaml).unwrap().validate().unwrap();
        assert_eq!(v.tessellation.nside(), 8);
        assert_eq!(v.altitudes.as_slice(), &[500.0, 1200.0]);
        assert_eq!(v.frequencies.values()[0], 55.0);
        assert_eq!(v.frequencies.len(), 550);
        assert_eq!(v.beam, BeamPattern::SinSquare);
        assert!(v.bandwidth_mismatch());
        assert_eq!(v.cache_dir, Some(PathBuf::from("/tmp/elevations")));
    }

    #[test]
    fn bad_parameters_fail_validation() {
        let cases: &[(&str, fn(&Error) -> bool)] = &[
            ("resolution: 3", |e| matches!(e, Error::InvalidResolution(3))),
            ("altitudes: {min_km: 900, max_km: 400}", |e| matches!(e, Error::InvalidAltitudeRange(_))),
            ("altitudes: {count: 0}", |e| matches!(e, Error::InvalidAltitudeRange(_))),
            ("frequencies: {start_mhz: 110, stop_mhz: 55}", |e| matches!(e, Error::InvalidFrequencyRange(_))),
            ("frequencies: {step_mhz: -0.1}", |e| matches!(e, Error::InvalidFrequencyRange(_))),
            ("beam: cosine", |e| matches!(e, Error::UnknownBeamPattern(_))),
            ("channel_bandwidth_hz: 0", |e| matches!(e, Error::InvalidInput(_))),
        ];

        for (yaml, expected) in cases {
            let err = Settings::parse(yaml).unwrap().validate().unwrap_err();
            assert!(expected(&err), "{}: {:?}", yaml, err);
        }
    }

    #[test]
    fn unparsable_documents_are_config_errors() {
        assert!(matches!(Settings::parse("resolution: [4"), Err(Error::Config(_))));
        assert!(matches!(Settings::parse("colour: blue"), Err(Error::Config(_))));
        assert!(matches!(Settings::parse("altitudes: {count: -2}"), Err(Error::Config(_))));
    }

    #[test]
    fn yaml_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skyfm.yaml");
        let mut settings = Settings::default();
        settings.resolution = 16;
        settings.altitudes.values = Some(vec![550.0]);

        fs::write(&path, settings.to_yaml().unwrap()).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
        assert!(matches!(Settings::load_from(&dir.path().join("missing.yaml")), Err(Error::Config(_))));
    }
}
