//! Power series endgame: extrapolates a tracked path to its limit at `t = 0`.
//!
//! This module contains the settings, status codes and fatal errors shared by
//! the endgame components, plus the tagged precision types used to store and
//! report results at either fixed or arbitrary precision.

pub mod cycle_number;
pub mod extrapolation;
pub mod history;
pub mod power_series;

pub use cycle_number::upper_bound_on_cycle_number;
pub use extrapolation::to_s_plane;
pub use history::{History, HistoryScalar, Window};
pub use power_series::{PowerSeriesEndgame, RunSummary};

use anyhow::{bail, Context, Result};
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::{Arithmetic, ComplexScalar, FIXED_DIGITS};

/// Outcome of an endgame run or of one of its collaborators.
///
/// Everything other than `Success`, `MinTrackTimeReached` and
/// `SecurityMaxNormReached` originates in the tracker and is forwarded as-is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SuccessCode {
    Success,
    MinTrackTimeReached,
    SecurityMaxNormReached,
    GoingToInfinity,
    FailedToConverge,
    MatrixSolveFailure,
    MaxNumStepsTaken,
    MinStepSizeReached,
}

/// Unrecoverable conditions. An endgame that returns one of these must not be
/// continued; they indicate a setup or logic error rather than a numerical event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndgameError {
    #[error("number of variables in start point, {found}, must match the number of variables in the system, {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("cycle number is 0 while computing approximation of root at target time")]
    ZeroCycleNumber,
    #[error("cycle number estimation needs at least {needed} samples, found {found}")]
    InsufficientSamples { needed: usize, found: usize },
    #[error("history holds {times} times but {samples} samples")]
    MismatchedHistory { times: usize, samples: usize },
}

/// Settings specific to the power series endgame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PowerSeriesSettings {
    /// Multiplier applied to the rounded cycle number estimate.
    pub cycle_number_amplification: f64,
    pub max_cycle_number: usize,
}

impl Default for PowerSeriesSettings {
    fn default() -> Self {
        Self {
            cycle_number_amplification: 5.0,
            max_cycle_number: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndgameSettings {
    /// Size of the sliding window of samples.
    pub num_sample_points: usize,
    /// Geometric shrink factor applied to `t` between samples.
    pub sample_factor: f64,
    /// The endgame gives up once the next time would fall below this in modulus.
    pub min_track_time: f64,
}

impl Default for EndgameSettings {
    fn default() -> Self {
        Self {
            num_sample_points: 3,
            sample_factor: 0.5,
            min_track_time: 1e-11,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecuritySettings {
    /// Security checking is on when `level <= 0`.
    pub level: i32,
    pub max_norm: f64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            level: 0,
            max_norm: 1e4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToleranceSettings {
    pub final_tolerance: f64,
}

impl Default for ToleranceSettings {
    fn default() -> Self {
        Self {
            final_tolerance: 1e-11,
        }
    }
}

/// Everything an endgame instance reads at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EndgameConfig {
    pub power_series: PowerSeriesSettings,
    pub endgame: EndgameSettings,
    pub security: SecuritySettings,
    pub tolerances: ToleranceSettings,
    /// Seed for the cycle-number projection vector; entropy when absent.
    pub seed: Option<u64>,
}

impl EndgameConfig {
    /// Parses a TOML document; absent tables and keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).context("Failed to parse endgame configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endgame.num_sample_points < 3 {
            bail!(
                "num_sample_points must be at least 3, got {}.",
                self.endgame.num_sample_points
            );
        }
        let factor = self.endgame.sample_factor;
        if !(factor > 0.0 && factor < 1.0) {
            bail!("sample_factor must lie in (0, 1), got {}.", factor);
        }
        if !(self.endgame.min_track_time > 0.0) {
            bail!("min_track_time must be positive.");
        }
        if !(self.tolerances.final_tolerance > 0.0) {
            bail!("final_tolerance must be positive.");
        }
        if !(self.security.max_norm > 0.0) {
            bail!("max_norm must be positive.");
        }
        if !(self.power_series.cycle_number_amplification > 0.0) {
            bail!("cycle_number_amplification must be positive.");
        }
        if self.power_series.max_cycle_number == 0 {
            bail!("max_cycle_number must be at least 1.");
        }
        Ok(())
    }
}

/// Which representation of the history is live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PrecisionMode {
    Fixed,
    /// Arbitrary precision with the given number of decimal digits.
    Multiple(u32),
}

impl PrecisionMode {
    pub fn digits(&self) -> u32 {
        match self {
            PrecisionMode::Fixed => FIXED_DIGITS,
            PrecisionMode::Multiple(digits) => *digits,
        }
    }
}

/// A point stored at whichever precision produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Point {
    Fixed(DVector<Complex64>),
    Multiple(DVector<rug::Complex>),
}

impl Default for Point {
    fn default() -> Self {
        Point::Fixed(DVector::from_vec(Vec::new()))
    }
}

impl Point {
    pub fn mode(&self) -> PrecisionMode {
        match self {
            Point::Fixed(_) => PrecisionMode::Fixed,
            Point::Multiple(v) => PrecisionMode::Multiple(v.iter().map(|c| c.digits()).max().unwrap_or(FIXED_DIGITS)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Point::Fixed(v) => v.len(),
            Point::Multiple(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Narrows (or copies) to machine precision.
    pub fn to_fixed(&self) -> DVector<Complex64> {
        match self {
            Point::Fixed(v) => v.clone(),
            Point::Multiple(v) => v.map(|c| c.to_c64()),
        }
    }

    /// Re-expresses the point in `mode`, with the same rules as the history store.
    pub fn converted(&self, mode: PrecisionMode) -> Point {
        match (self, mode) {
            (Point::Fixed(v), PrecisionMode::Fixed) => Point::Fixed(v.clone()),
            (Point::Multiple(v), PrecisionMode::Fixed) => Point::Fixed(v.map(|c| c.to_c64())),
            (Point::Fixed(v), PrecisionMode::Multiple(digits)) => {
                Point::Multiple(v.map(|c| <rug::Complex as ComplexScalar>::from_c64(c, digits)))
            }
            (Point::Multiple(v), PrecisionMode::Multiple(digits)) => {
                let mut v = v.clone();
                for c in v.iter_mut() {
                    c.set_digits(digits);
                }
                Point::Multiple(v)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_validate() {
        let config = EndgameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.power_series.max_cycle_number, 6);
        assert_eq!(config.endgame.num_sample_points, 3);
    }

    #[test]
    fn config_from_partial_toml() {
        let config = EndgameConfig::from_toml_str(
            r#"
            seed = 7

            [endgame]
            sample_factor = 0.25

            [tolerances]
            final_tolerance = 1e-9
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.endgame.sample_factor, 0.25);
        assert_eq!(config.endgame.num_sample_points, 3);
        assert_eq!(config.tolerances.final_tolerance, 1e-9);
        assert_eq!(config.security, SecuritySettings::default());
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(EndgameConfig::from_toml_str("[endgame]\nnum_sample_points = 2").is_err());
        assert!(EndgameConfig::from_toml_str("[endgame]\nsample_factor = 1.5").is_err());
        assert!(EndgameConfig::from_toml_str("[power_series]\nmax_cycle_number = 0").is_err());
        assert!(EndgameConfig::from_toml_str("[tolerances]\nfinal_tolerance = -1.0").is_err());
        assert!(EndgameConfig::from_toml_str("endgame = 3").is_err());
    }

    #[test]
    fn point_conversion_round_trip() {
        let fixed = Point::Fixed(DVector::from_vec(vec![
            Complex64::new(0.1, -2.5),
            Complex64::new(1e-300, 3.0),
        ]));
        let widened = fixed.converted(PrecisionMode::Multiple(40));
        assert_eq!(widened.mode(), PrecisionMode::Multiple(40));
        assert_eq!(widened.converted(PrecisionMode::Fixed), fixed);
        assert_eq!(widened.to_fixed(), fixed.to_fixed());
        assert_eq!(widened.len(), 2);
        assert!(Point::default().is_empty());
    }

    #[test]
    fn error_messages() {
        let err = EndgameError::DimensionMismatch { expected: 2, found: 3 };
        assert!(err.to_string().contains("3"));
        assert!(EndgameError::ZeroCycleNumber.to_string().contains("cycle number is 0"));
    }
}
