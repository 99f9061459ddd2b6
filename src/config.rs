use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Everything a tracking run can be tuned with. Passed by value or reference,
/// never stored globally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[derive(clap::Args)]
#[serde(default)]
pub struct Config {
    /// seed for the synthetic frame source
    #[clap(long, default_value = "0")]
    pub seed: u64,

    #[clap(flatten)]
    pub assembler: AssemblerConfig,

    #[clap(flatten)]
    pub background: BackgroundConfig,

    #[clap(flatten)]
    pub segment: SegmentConfig,

    #[clap(flatten)]
    pub filter: FilterConfig,
}

impl Config {
    /// Read a configuration previously written with `save`
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Config {} is not valid JSON", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        self.assembler.validate()?;
        self.background.validate()?;
        self.segment.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[derive(clap::Args)]
#[serde(default)]
pub struct AssemblerConfig {
    /// pixel distance below which a detection continues a track
    #[clap(long = "near", default_value = "100")]
    pub proximity_threshold: f64,

    /// shortest track, in points, that is reported
    #[clap(long = "min-length", default_value = "3")]
    pub min_track_length: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: 100.,
            min_track_length: 3,
        }
    }
}

impl AssemblerConfig {
    pub fn new(proximity_threshold: f64, min_track_length: usize) -> Result<Self, TrackError> {
        let config = Self {
            proximity_threshold,
            min_track_length,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        validate_proximity(self.proximity_threshold)?;
        validate_min_length(self.min_track_length)
    }
}

pub(crate) fn validate_proximity(proximity_threshold: f64) -> Result<(), TrackError> {
    // NaN fails this as well
    if !(proximity_threshold > 0. && proximity_threshold.is_finite()) {
        return Err(TrackError::InvalidProximity(proximity_threshold));
    }
    Ok(())
}

pub(crate) fn validate_min_length(min_track_length: usize) -> Result<(), TrackError> {
    if min_track_length == 0 {
        return Err(TrackError::InvalidMinLength(min_track_length));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[derive(clap::Args)]
#[serde(default)]
pub struct BackgroundConfig {
    /// number of leading frames averaged into the background
    #[clap(long = "background-frames", default_value = "10")]
    pub frames: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { frames: 10 }
    }
}

impl BackgroundConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.frames == 0 {
            return Err(TrackError::EmptyBackground);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[derive(clap::Args)]
#[serde(default)]
pub struct SegmentConfig {
    /// intensity above which a pixel is foreground (absolute threshold)
    #[clap(long, default_value = "10")]
    pub min_thresh: f64,

    /// odd block size for the adaptive threshold
    #[clap(long, default_value = "101")]
    pub thresh_area: usize,

    /// width of the opening kernel
    #[clap(long, default_value = "10")]
    pub open_x: usize,

    /// height of the opening kernel
    #[clap(long, default_value = "10")]
    pub open_y: usize,

    /// use the absolute threshold instead of the adaptive one
    #[clap(long)]
    pub absolute: bool,

    /// swap foreground and background when thresholding
    #[clap(long)]
    pub invert: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            min_thresh: 10.,
            thresh_area: 101,
            open_x: 10,
            open_y: 10,
            absolute: false,
            invert: false,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.thresh_area < 3 || self.thresh_area % 2 == 0 {
            return Err(TrackError::InvalidBound {
                name: "thresh_area",
                value: self.thresh_area.to_string(),
            });
        }
        if self.open_x == 0 {
            return Err(TrackError::InvalidBound {
                name: "open_x",
                value: self.open_x.to_string(),
            });
        }
        if self.open_y == 0 {
            return Err(TrackError::InvalidBound {
                name: "open_y",
                value: self.open_y.to_string(),
            });
        }
        Ok(())
    }
}

/// One side of a filter range. `None` means no constraint on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bound(pub Option<f64>);

impl Bound {
    pub const NONE: Bound = Bound(None);

    pub fn get(&self) -> Option<f64> {
        self.0
    }
}

impl From<Option<f64>> for Bound {
    fn from(value: Option<f64>) -> Self {
        Bound(value)
    }
}

impl From<f64> for Bound {
    fn from(value: f64) -> Self {
        Bound(Some(value))
    }
}

impl FromStr for Bound {
    type Err = TrackError;

    /// Blank text (or `none`) clears the bound
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Bound(None));
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Bound(Some(v))),
            _ => Err(TrackError::InvalidBound {
                name: "bound",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "none"),
        }
    }
}

/// Area, perimeter and area/perimeter bounds a contour must fall within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[derive(clap::Args)]
#[serde(default)]
pub struct FilterConfig {
    #[clap(long, default_value = "10")]
    pub area_min: Bound,
    #[clap(long, default_value = "3000")]
    pub area_max: Bound,
    #[clap(long, default_value = "10")]
    pub perim_min: Bound,
    #[clap(long, default_value = "400")]
    pub perim_max: Bound,
    #[clap(long, default_value = "none")]
    pub ratio_min: Bound,
    #[clap(long, default_value = "none")]
    pub ratio_max: Bound,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            area_min: Bound(Some(10.)),
            area_max: Bound(Some(3000.)),
            perim_min: Bound(Some(10.)),
            perim_max: Bound(Some(400.)),
            ratio_min: Bound::NONE,
            ratio_max: Bound::NONE,
        }
    }
}

impl FilterConfig {
    /// A filter that lets every contour through
    pub fn unbounded() -> Self {
        Self {
            area_min: Bound::NONE,
            area_max: Bound::NONE,
            perim_min: Bound::NONE,
            perim_max: Bound::NONE,
            ratio_min: Bound::NONE,
            ratio_max: Bound::NONE,
        }
    }
}

impl fmt::Display for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "area ({}, {}) perimeter ({}, {}) ratio ({}, {})",
            self.area_min, self.area_max, self.perim_min, self.perim_max, self.ratio_min, self.ratio_max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_parsing() {
        assert_eq!("".parse::<Bound>().unwrap(), Bound(None));
        assert_eq!("  ".parse::<Bound>().unwrap(), Bound(None));
        assert_eq!("None".parse::<Bound>().unwrap(), Bound(None));
        assert_eq!("12.5".parse::<Bound>().unwrap(), Bound(Some(12.5)));
        assert!("abc".parse::<Bound>().is_err());
        assert!("inf".parse::<Bound>().is_err());
    }

    #[test]
    fn test_assembler_config_validation() {
        assert!(AssemblerConfig::new(100., 3).is_ok());
        assert_eq!(
            AssemblerConfig::new(0., 3),
            Err(TrackError::InvalidProximity(0.))
        );
        assert!(AssemblerConfig::new(-5., 3).is_err());
        assert!(AssemblerConfig::new(f64::NAN, 3).is_err());
        assert_eq!(
            AssemblerConfig::new(10., 0),
            Err(TrackError::InvalidMinLength(0))
        );
    }

    #[test]
    fn test_segment_config_validation() {
        assert!(SegmentConfig::default().validate().is_ok());
        let even = SegmentConfig {
            thresh_area: 100,
            ..Default::default()
        };
        assert!(even.validate().is_err());
        let flat = SegmentConfig {
            open_y: 0,
            ..Default::default()
        };
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let path = std::env::temp_dir().join(format!("hvtrack-config-{}.json", std::process::id()));
        let mut config = Config::default();
        config.seed = 7;
        config.filter.ratio_min = Bound(Some(0.5));
        config.assembler.proximity_threshold = 42.;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"assembler": {"proximity_threshold": 20.0}}"#).unwrap();
        assert_eq!(config.assembler.proximity_threshold, 20.);
        assert_eq!(config.assembler.min_track_length, 3);
        assert_eq!(config.filter, FilterConfig::default());
    }
}
