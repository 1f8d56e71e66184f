//! Index options and search tuning.
//!
//! Both types are plain serde structs with per-field defaults so they can be
//! loaded from JSON (or TOML with the `toml` feature) while keeping every
//! field optional.

use crate::error::{GeoError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options stored with a 2d index: hash precision and coordinate domain.
///
/// # Example
///
/// ```rust
/// use geo2d::IndexOptions;
///
/// let json = r#"{ "bits": 20, "min": -500, "max": 500 }"#;
/// let opts: IndexOptions = serde_json::from_str(json).unwrap();
/// assert!(opts.validate().is_ok());
/// assert_eq!(IndexOptions::default().bits, 26);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Bits of precision per axis (1-32). 26 is roughly one foot for lat/long.
    #[serde(default = "IndexOptions::default_bits")]
    pub bits: u32,

    /// Lower bound of the coordinate domain, shared by both axes.
    #[serde(default = "IndexOptions::default_min")]
    pub min: f64,

    /// Upper bound of the coordinate domain, shared by both axes.
    #[serde(default = "IndexOptions::default_max")]
    pub max: f64,
}

impl IndexOptions {
    const fn default_bits() -> u32 {
        26
    }

    const fn default_min() -> f64 {
        -180.0
    }

    const fn default_max() -> f64 {
        180.0
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Reads `bits`, `min` and `max` from an index spec's info document.
    ///
    /// Missing fields take their defaults; present fields must be numbers.
    pub fn from_spec_info(info: &Value) -> Result<Self> {
        let mut opts = Self::default();

        if let Some(bits) = numeric_option(info, "bits")? {
            if !(bits > 0.0 && bits <= 32.0) {
                return Err(GeoError::InvalidOptions(format!(
                    "bits for hash must be > 0 and <= 32, but {} bits were specified",
                    bits
                )));
            }
            opts.bits = bits as u32;
        }
        if let Some(min) = numeric_option(info, "min")? {
            opts.min = min;
        }
        if let Some(max) = numeric_option(info, "max")? {
            opts.max = max;
        }

        opts.validate()?;
        Ok(opts)
    }

    /// Checks the options describe a usable hash space.
    pub fn validate(&self) -> Result<()> {
        if self.bits < 1 || self.bits > 32 {
            return Err(GeoError::InvalidOptions(format!(
                "bits for hash must be > 0 and <= 32, but {} bits were specified",
                self.bits
            )));
        }

        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(GeoError::InvalidOptions(format!(
                "region for hash must be valid and have positive area, but [{}, {}] was specified",
                self.min, self.max
            )));
        }

        Ok(())
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            bits: Self::default_bits(),
            min: Self::default_min(),
            max: Self::default_max(),
        }
    }
}

fn numeric_option(info: &Value, name: &str) -> Result<Option<f64>> {
    match info.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(GeoError::InvalidOptions(format!(
            "'{}' must be a number, got: {}",
            name, other
        ))),
    }
}

/// Tuning knobs for the expanding search.
///
/// ```rust
/// use geo2d::SearchConfig;
///
/// let json = r#"{ "max_points_heuristic": 200 }"#;
/// let config: SearchConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.max_points_heuristic, 200);
/// assert_eq!(config.max_fringe_depth, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidate keys examined (and points added) per call into the engine.
    #[serde(default = "SearchConfig::default_max_points_heuristic")]
    pub max_points_heuristic: usize,

    /// Levels a neighbor cell may be subdivided into fringe cells.
    #[serde(default = "SearchConfig::default_max_fringe_depth")]
    pub max_fringe_depth: u32,

    /// Result count used when a query asks for zero results.
    #[serde(default = "SearchConfig::default_num_wanted")]
    pub default_num_wanted: usize,

    /// Size cap for serialized `geoNear` results.
    #[serde(default = "SearchConfig::default_max_result_bytes")]
    pub max_result_bytes: usize,
}

impl SearchConfig {
    const fn default_max_points_heuristic() -> usize {
        50
    }

    const fn default_max_fringe_depth() -> u32 {
        2
    }

    const fn default_num_wanted() -> usize {
        100
    }

    const fn default_max_result_bytes() -> usize {
        16 * 1024 * 1024
    }

    pub fn with_max_points_heuristic(mut self, points: usize) -> Self {
        assert!(points > 0, "Per-call point budget must be greater than zero");
        self.max_points_heuristic = points;
        self
    }

    pub fn with_max_fringe_depth(mut self, depth: u32) -> Self {
        self.max_fringe_depth = depth;
        self
    }

    pub fn with_default_num_wanted(mut self, num: usize) -> Self {
        self.default_num_wanted = num;
        self
    }

    pub fn with_max_result_bytes(mut self, bytes: usize) -> Self {
        self.max_result_bytes = bytes;
        self
    }

    /// Load a search configuration from TOML text.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GeoError::InvalidOptions(e.to_string()))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_points_heuristic: Self::default_max_points_heuristic(),
            max_fringe_depth: Self::default_max_fringe_depth(),
            default_num_wanted: Self::default_num_wanted(),
            max_result_bytes: Self::default_max_result_bytes(),
        }
    }
}
