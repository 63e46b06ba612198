use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use super::history::{History, HistoryScalar};
use super::{
    EndgameConfig, EndgameError, EndgameSettings, Point, PowerSeriesSettings, PrecisionMode,
    SecuritySettings, SuccessCode, ToleranceSettings,
};
use crate::linalg::{difference, norm};
use crate::traits::{HomotopySystem, Tracker};

/// Diagnostics of the most recent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Passes through the refinement loop, including the one that stopped it.
    pub iterations: usize,
    /// Distance between each pair of successive approximations at `t = 0`.
    pub approximation_errors: Vec<f64>,
    /// Cycle number used by each extrapolation, in order.
    pub cycle_numbers: Vec<usize>,
}

/// Power series endgame for a single path.
///
/// Borrows the tracker (and through it the homotopy) for its whole life and
/// owns its history, random source and results. The impl is split across the
/// `cycle_number` and `extrapolation` modules.
pub struct PowerSeriesEndgame<'a, Tr: Tracker> {
    pub(super) tracker: &'a Tr,
    pub(super) power_series: PowerSeriesSettings,
    pub(super) endgame: EndgameSettings,
    pub(super) security: SecuritySettings,
    pub(super) tolerances: ToleranceSettings,
    pub(super) history: History,
    pub(super) cycle_number: usize,
    pub(super) upper_bound_on_cycle_number: usize,
    pub(super) final_approximation: Point,
    pub(super) summary: RunSummary,
    pub(super) rng: StdRng,
}

impl<'a, Tr: Tracker> PowerSeriesEndgame<'a, Tr> {
    /// `config` is taken as given; `EndgameConfig::validate` is the place to reject bad values.
    pub fn new(tracker: &'a Tr, config: EndgameConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            tracker,
            power_series: config.power_series,
            endgame: config.endgame,
            security: config.security,
            tolerances: config.tolerances,
            history: History::new(config.endgame.num_sample_points),
            cycle_number: 0,
            upper_bound_on_cycle_number: 0,
            final_approximation: Point::default(),
            summary: RunSummary::default(),
            rng,
        }
    }

    pub fn tracker(&self) -> &'a Tr {
        self.tracker
    }

    pub fn power_series_settings(&self) -> &PowerSeriesSettings {
        &self.power_series
    }

    /// Takes effect from the next bound computation; the history is untouched.
    pub fn set_power_series_settings(&mut self, settings: PowerSeriesSettings) {
        self.power_series = settings;
    }

    pub fn endgame_settings(&self) -> &EndgameSettings {
        &self.endgame
    }

    pub fn security_settings(&self) -> &SecuritySettings {
        &self.security
    }

    pub fn tolerances(&self) -> &ToleranceSettings {
        &self.tolerances
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn cycle_number(&self) -> usize {
        self.cycle_number
    }

    pub fn upper_bound_on_cycle_number(&self) -> usize {
        self.upper_bound_on_cycle_number
    }

    /// Best estimate of the path's value at `t = 0` from the last run.
    pub fn final_approximation(&self) -> &Point {
        &self.final_approximation
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Converts the stored history and final approximation to `mode`.
    pub fn change_precision(&mut self, mode: PrecisionMode) {
        debug!(from = ?self.history.mode(), to = ?mode, "changing endgame precision");
        self.history.change_precision(mode);
        self.final_approximation = self.final_approximation.converted(mode);
    }

    /// Runs the endgame from `start_point` at `start_time`, the endgame boundary.
    ///
    /// Returns the numerical outcome; tracking and refinement failures are
    /// forwarded unchanged. The result is available from
    /// [`final_approximation`](Self::final_approximation) whenever an
    /// extrapolation completed.
    pub fn run<T: HistoryScalar>(
        &mut self,
        start_time: &T,
        start_point: &DVector<T>,
    ) -> Result<SuccessCode, EndgameError> {
        let tracker = self.tracker;
        let system = tracker.system();

        let expected = system.num_variables();
        if start_point.len() != expected {
            error!(expected, found = start_point.len(), "start point has the wrong dimension");
            return Err(EndgameError::DimensionMismatch {
                expected,
                found: start_point.len(),
            });
        }

        let digits = start_point
            .iter()
            .map(|v| v.digits())
            .max()
            .unwrap_or_else(|| start_time.digits());
        let mode = T::mode(digits);
        trace!(?mode, "starting power series endgame");

        self.history.set_mode(mode);
        self.history.set_capacity(self.endgame.num_sample_points);
        self.history.clear::<T>();
        self.cycle_number = 0;
        self.upper_bound_on_cycle_number = 0;
        self.final_approximation = Point::default();
        self.summary = RunSummary::default();

        let (times, samples) = match tracker.gather_initial_samples(
            start_time,
            start_point,
            self.endgame.sample_factor,
            self.endgame.num_sample_points,
        ) {
            Ok(gathered) => gathered,
            Err(code) => {
                warn!(?code, "initial sample gathering failed");
                return Ok(code);
            }
        };
        self.history.set_times(times);
        self.history.set_samples(samples);

        let origin = T::zero(digits);
        let mut prev_approx = match self.compute_approximation_of_x_at_t0(&origin)? {
            Ok(approx) => approx,
            Err(code) => return Ok(code),
        };

        let security_enabled = self.security.level <= 0;
        let max_norm = self.security.max_norm;
        let mut prev_norm = if security_enabled {
            norm(&system.dehomogenize_point(&prev_approx))
        } else {
            0.0
        };

        loop {
            self.summary.iterations += 1;
            self.final_approximation = T::into_point(prev_approx.clone());

            let (current_time, current_sample) = match self.history.window::<T>().newest() {
                Some((time, sample)) => (time.clone(), sample.clone()),
                None => {
                    return Err(EndgameError::InsufficientSamples { needed: 1, found: 0 });
                }
            };

            let next_time = current_time.scaled_by(self.endgame.sample_factor);
            if next_time.modulus() < self.endgame.min_track_time {
                debug!(
                    iterations = self.summary.iterations,
                    "next sample time is below the minimum track time"
                );
                return Ok(SuccessCode::MinTrackTimeReached);
            }

            trace!(next_time = ?next_time.to_c64(), "tracking to next sample time");
            let next_sample = match tracker.track_path(&current_time, &next_time, &current_sample) {
                Ok(sample) => sample,
                Err(code) => {
                    warn!(?code, "tracking to the next sample time failed");
                    return Ok(code);
                }
            };
            self.history.push(next_time, next_sample);

            let latest_approx = match self.compute_approximation_of_x_at_t0(&origin)? {
                Ok(approx) => approx,
                Err(code) => {
                    warn!(?code, "failed to compute the approximation at the origin");
                    return Ok(code);
                }
            };

            let latest_norm = if security_enabled {
                let latest_norm = norm(&system.dehomogenize_point(&latest_approx));
                if latest_norm > max_norm && prev_norm > max_norm {
                    debug!(latest_norm, prev_norm, "approximations exceeded the security norm");
                    return Ok(SuccessCode::SecurityMaxNormReached);
                }
                latest_norm
            } else {
                0.0
            };

            let approx_error = norm(&difference(&latest_approx, &prev_approx));
            self.summary.approximation_errors.push(approx_error);
            trace!(approx_error, "compared successive approximations");

            if approx_error < self.tolerances.final_tolerance {
                debug!(
                    iterations = self.summary.iterations,
                    cycle_number = self.cycle_number,
                    "power series endgame converged"
                );
                self.final_approximation = T::into_point(latest_approx);
                return Ok(SuccessCode::Success);
            }

            prev_approx = latest_approx;
            prev_norm = latest_norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::EquationSystem;
    use crate::tracker::{PathTracker, TrackerSettings};
    use crate::traits::Arithmetic;
    use num_complex::Complex64;
    use rug::{Complex, Float};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn tracker_for(functions: &[&str]) -> PathTracker<EquationSystem> {
        let variables: Vec<String> = (0..functions.len())
            .map(|i| ["x", "y", "z"][i].to_string())
            .collect();
        let names: Vec<&str> = variables.iter().map(String::as_str).collect();
        let system = EquationSystem::new(&names, "t", functions).unwrap();
        PathTracker::new(system, TrackerSettings::default())
    }

    fn seeded(final_tolerance: f64) -> EndgameConfig {
        let mut config = EndgameConfig::default();
        config.tolerances.final_tolerance = final_tolerance;
        config.seed = Some(42);
        config
    }

    #[test]
    fn converges_to_smooth_limit() {
        let tracker = tracker_for(&["(1 + t)*x - 1"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, seeded(1e-10));
        let start = DVector::from_vec(vec![c(1.0 / 1.1, 0.0)]);

        let code = endgame.run(&c(0.1, 0.0), &start).unwrap();
        assert_eq!(code, SuccessCode::Success);

        let limit = endgame.final_approximation().to_fixed();
        assert!((limit[0] - c(1.0, 0.0)).norm() < 1e-9);

        let summary = endgame.summary();
        let errors = &summary.approximation_errors;
        assert!(*errors.last().unwrap() < 1e-10);
        assert!(errors.len() >= 2);
        assert!(
            errors.windows(2).all(|w| w[1] <= w[0]),
            "approximation errors grew: {:?}",
            errors
        );
        assert_eq!(summary.cycle_numbers.len(), summary.iterations + 1);
    }

    #[test]
    fn state_is_reset_between_runs() {
        let tracker = tracker_for(&["(1 + t)*x - 1"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, seeded(1e-10));
        let start = DVector::from_vec(vec![c(1.0 / 1.1, 0.0)]);

        assert_eq!(endgame.run(&c(0.1, 0.0), &start), Ok(SuccessCode::Success));
        assert_eq!(endgame.run(&c(0.1, 0.0), &start), Ok(SuccessCode::Success));
        let summary = endgame.summary();
        assert_eq!(summary.cycle_numbers.len(), summary.iterations + 1);
        assert_eq!(summary.approximation_errors.len(), summary.iterations);
        assert_eq!(endgame.history().window::<Complex64>().len(), 3);
    }

    #[test]
    fn diverging_path_trips_security() {
        let tracker = tracker_for(&["t*x - 1"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, seeded(1e-10));
        let start = DVector::from_vec(vec![c(10.0, 0.0)]);

        let code = endgame.run(&c(0.1, 0.0), &start).unwrap();
        assert_eq!(code, SuccessCode::SecurityMaxNormReached);
        assert!(endgame.final_approximation().to_fixed()[0].norm() > 1e3);
    }

    #[test]
    fn security_check_can_be_disabled() {
        let tracker = tracker_for(&["t*x - 1"]);
        let mut config = seeded(1e-10);
        config.security.level = 1;
        let mut endgame = PowerSeriesEndgame::new(&tracker, config);
        let start = DVector::from_vec(vec![c(10.0, 0.0)]);

        let code = endgame.run(&c(0.1, 0.0), &start).unwrap();
        assert_ne!(code, SuccessCode::SecurityMaxNormReached);
        assert_ne!(code, SuccessCode::Success);
    }

    #[test]
    fn stops_at_minimum_track_time() {
        let tracker = tracker_for(&["x^2 - 4 - t"]);
        let mut config = seeded(1e-12);
        config.endgame.min_track_time = 0.02;
        let mut endgame = PowerSeriesEndgame::new(&tracker, config);
        let start = DVector::from_vec(vec![c(4.1f64.sqrt(), 0.0)]);

        let code = endgame.run(&c(0.1, 0.0), &start).unwrap();
        assert_eq!(code, SuccessCode::MinTrackTimeReached);

        // the approximation from the initial samples is kept
        let limit = endgame.final_approximation().to_fixed();
        assert!((limit[0] - c(2.0, 0.0)).norm() < 1e-6);
        assert_eq!(endgame.summary().iterations, 1);
        assert!(endgame.summary().approximation_errors.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let tracker = tracker_for(&["x - t"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, EndgameConfig::default());
        let start = DVector::from_vec(vec![c(0.1, 0.0), c(0.0, 0.0)]);
        assert_eq!(
            endgame.run(&c(0.1, 0.0), &start),
            Err(EndgameError::DimensionMismatch { expected: 1, found: 2 })
        );
    }

    #[test]
    fn tracking_failure_is_forwarded() {
        let tracker = tracker_for(&["x^2 - t"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, EndgameConfig::default());
        let start = DVector::from_vec(vec![c(0.0, 0.0)]);
        assert_eq!(
            endgame.run(&c(0.1, 0.0), &start),
            Ok(SuccessCode::MatrixSolveFailure)
        );
        assert!(endgame.final_approximation().is_empty());
    }

    #[test]
    fn singular_endpoint_in_multiple_precision() {
        const DIGITS: u32 = 30;
        let bits = crate::traits::digits_to_bits(DIGITS);
        let tracker = tracker_for(&["(x-1)^3*(1-t) + (x^3+1)*t", "(y-1)^2*(1-t) + (y^2+1)*t"]);
        let config = EndgameConfig::from_toml_str(
            r#"
            seed = 5

            [tolerances]
            final_tolerance = 1e-9
            "#,
        )
        .unwrap();
        let mut endgame = PowerSeriesEndgame::new(&tracker, config);

        // on the path at t = 0.1: x = 1/2 and y = 0.9 + i·sqrt(0.19)
        let x = <Complex as Arithmetic>::literal("0.5", DIGITS);
        let y_re = Float::with_val(bits, Float::parse("0.9").unwrap());
        let y_im = Float::with_val(bits, Float::parse("0.19").unwrap()).sqrt();
        let y = Complex::with_val(bits, (y_re, y_im));
        let start = DVector::from_vec(vec![x, y]);
        let start_time = <Complex as Arithmetic>::literal("0.1", DIGITS);

        let code = endgame.run(&start_time, &start).unwrap();
        assert_eq!(code, SuccessCode::Success);
        assert_eq!(endgame.final_approximation().mode(), PrecisionMode::Multiple(DIGITS));

        let limit = endgame.final_approximation().to_fixed();
        let distance = ((limit[0] - c(1.0, 0.0)).norm_sqr() + (limit[1] - c(1.0, 0.0)).norm_sqr()).sqrt();
        assert!(distance < 1e-8, "distance to (1, 1) was {}", distance);

        endgame.change_precision(PrecisionMode::Fixed);
        assert_eq!(endgame.history().mode(), PrecisionMode::Fixed);
        assert_eq!(endgame.final_approximation(), &Point::Fixed(limit));
        assert_eq!(endgame.history().window::<Complex64>().len(), 3);
    }

    #[test]
    fn singular_endpoint_in_fixed_precision() {
        let tracker = tracker_for(&["(x-1)^3*(1-t) + (x^3+1)*t", "(y-1)^2*(1-t) + (y^2+1)*t"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, seeded(1e-8));
        let start = DVector::from_vec(vec![c(0.5, 0.0), c(0.9, 0.19f64.sqrt())]);

        let code = endgame.run(&c(0.1, 0.0), &start).unwrap();
        assert_eq!(code, SuccessCode::Success);
        assert_eq!(endgame.final_approximation().mode(), PrecisionMode::Fixed);

        let limit = endgame.final_approximation().to_fixed();
        let distance = ((limit[0] - c(1.0, 0.0)).norm_sqr() + (limit[1] - c(1.0, 0.0)).norm_sqr()).sqrt();
        assert!(distance < 1e-8, "distance to (1, 1) was {}", distance);
        assert!(endgame.summary().cycle_numbers.iter().all(|&n| n >= 1));
    }

    #[test]
    fn power_series_settings_can_be_replaced() {
        let tracker = tracker_for(&["(1 + t)*x - 1"]);
        let mut endgame = PowerSeriesEndgame::new(&tracker, seeded(1e-10));
        let settings = PowerSeriesSettings {
            cycle_number_amplification: 2.0,
            max_cycle_number: 3,
        };
        endgame.set_power_series_settings(settings);
        assert_eq!(endgame.power_series_settings(), &settings);

        // ratio sqrt(1/2) gives an estimate of 2, amplified to 4 instead of the default 10
        let sample = |x: f64| DVector::from_vec(vec![c(x, 0.0)]);
        let bound = crate::endgame::upper_bound_on_cycle_number(
            &sample(0.0),
            &sample(1.0),
            &sample(1.0 + 0.5f64.sqrt()),
            &sample(0.3),
            0.5,
            endgame.power_series_settings(),
        );
        assert_eq!(bound, 4);
    }
}
