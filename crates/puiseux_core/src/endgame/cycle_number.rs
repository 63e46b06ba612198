//! Cycle number detection.
//!
//! A path reaching a singular endpoint is analytic in `s = t^(1/c)` for some
//! positive integer `c`. The estimate below bounds `c` from the decay rate of
//! successive sample differences, then the exhaustive search picks the
//! candidate whose Hermite prediction of the newest sample is closest.

use nalgebra::DVector;
use tracing::{debug, trace, warn};

use super::extrapolation::to_s_plane;
use super::history::HistoryScalar;
use super::power_series::PowerSeriesEndgame;
use super::{EndgameError, PowerSeriesSettings, SuccessCode};
use crate::interpolation::hermite_interpolate_and_solve;
use crate::linalg::{bilinear_dot, difference, norm};
use crate::traits::{ComplexScalar, HomotopySystem, Tracker, FIXED_DIGITS};

/// Upper bound on the cycle number from three consecutive samples.
///
/// The projections onto `projection` use the plain bilinear pairing. An
/// estimate below 1 (including the zero produced by a vanishing difference)
/// or a NaN estimate gives 1. Otherwise the rounded estimate is amplified and
/// the larger of it and `max_cycle_number` is returned, so `max_cycle_number`
/// acts as a floor; an infinite estimate gives `max_cycle_number`.
pub fn upper_bound_on_cycle_number<T: ComplexScalar>(
    sample0: &DVector<T>,
    sample1: &DVector<T>,
    sample2: &DVector<T>,
    projection: &DVector<T>,
    sample_factor: f64,
    settings: &PowerSeriesSettings,
) -> usize {
    let later = bilinear_dot(&difference(sample2, sample1), projection).modulus();
    let earlier = bilinear_dot(&difference(sample1, sample0), projection).modulus();

    let estimate = (later / earlier).ln().abs();
    let estimate = sample_factor.ln().abs() / estimate;

    if estimate.is_nan() || estimate < 1.0 {
        return 1;
    }
    if estimate.is_infinite() {
        return settings.max_cycle_number;
    }

    let amplified = ((estimate + 0.5).floor() * settings.cycle_number_amplification).round();
    (amplified as usize).max(settings.max_cycle_number)
}

impl<'a, Tr: Tracker> PowerSeriesEndgame<'a, Tr> {
    /// Recomputes the upper bound from the three oldest samples of the live
    /// window, using a fresh random projection.
    pub fn compute_bound_on_cycle_number<T: HistoryScalar>(&mut self) -> Result<usize, EndgameError> {
        let samples = self.history.window::<T>().samples_ref();
        if samples.len() < 3 {
            return Err(EndgameError::InsufficientSamples {
                needed: 3,
                found: samples.len(),
            });
        }

        let digits = samples[0].iter().map(|v| v.digits()).max().unwrap_or(FIXED_DIGITS);
        let rng = &mut self.rng;
        let projection = DVector::from_fn(samples[0].len(), |_, _| T::random(&mut *rng, digits));

        let bound = upper_bound_on_cycle_number(
            &samples[0],
            &samples[1],
            &samples[2],
            &projection,
            self.endgame.sample_factor,
            &self.power_series,
        );
        self.upper_bound_on_cycle_number = bound;
        Ok(bound)
    }

    /// Searches `1..=bound` for the cycle number and stores it.
    ///
    /// Returns `dx/dt` at every entry of the window, in t-plane coordinates.
    /// A singular Jacobian at any entry is reported as `MatrixSolveFailure`.
    pub fn compute_cycle_number<T: HistoryScalar>(
        &mut self,
    ) -> Result<Result<Vec<DVector<T>>, SuccessCode>, EndgameError> {
        let window = self.history.window::<T>();
        window.check_consistent()?;
        if window.len() < 3 {
            return Err(EndgameError::InsufficientSamples {
                needed: 3,
                found: window.len(),
            });
        }

        let times: Vec<T> = window.times_ref().iter().cloned().collect();
        let samples: Vec<DVector<T>> = window.samples_ref().iter().cloned().collect();

        let tracker = self.tracker;
        let system = tracker.system();
        let mut derivatives = Vec::with_capacity(samples.len());
        for (time, sample) in times.iter().zip(samples.iter()) {
            match system.path_derivative(sample, time) {
                Some(derivative) => derivatives.push(derivative),
                None => {
                    warn!("singular Jacobian while differentiating the path");
                    return Ok(Err(SuccessCode::MatrixSolveFailure));
                }
            }
        }

        let bound = self.compute_bound_on_cycle_number::<T>()?;

        let num_used = samples.len() - 1;
        let newest_time = &times[num_used];
        let newest_sample = &samples[num_used];

        let mut min_difference = f64::MAX;
        for candidate in 1..=bound {
            let (s_times, s_derivatives) =
                to_s_plane(&times[..num_used], &derivatives[..num_used], candidate);
            let target = newest_time.pow_ratio(1, candidate as u32);
            let predicted = hermite_interpolate_and_solve(
                &target,
                num_used,
                &s_times,
                &samples[..num_used],
                &s_derivatives,
            );
            let diff = norm(&difference(&predicted, newest_sample));
            trace!(candidate, diff, "cycle number candidate");

            if diff < min_difference {
                min_difference = diff;
                self.cycle_number = candidate;
            }
        }

        debug!(
            cycle_number = self.cycle_number,
            upper_bound = bound,
            "cycle number estimated"
        );
        Ok(Ok(derivatives))
    }
}
