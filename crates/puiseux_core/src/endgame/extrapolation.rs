use nalgebra::DVector;
use tracing::{trace, warn};

use super::history::HistoryScalar;
use super::power_series::PowerSeriesEndgame;
use super::{EndgameError, SuccessCode};
use crate::interpolation::hermite_interpolate_and_solve;
use crate::linalg::scaled;
use crate::traits::{ComplexScalar, Tracker};

/// Maps times and t-plane derivatives into `s = t^(1/c)`:
/// `dx/ds = dx/dt · c · t^((c−1)/c)`.
pub fn to_s_plane<T: ComplexScalar>(
    times: &[T],
    derivatives: &[DVector<T>],
    cycle_number: usize,
) -> (Vec<T>, Vec<DVector<T>>) {
    let c = cycle_number as u32;
    let s_times = times.iter().map(|t| t.pow_ratio(1, c)).collect();
    let s_derivatives = times
        .iter()
        .zip(derivatives.iter())
        .map(|(t, dx_dt)| {
            let factor = t.pow_ratio(c.saturating_sub(1), c).scaled_by(cycle_number as f64);
            scaled(dx_dt, &factor)
        })
        .collect();
    (s_times, s_derivatives)
}

impl<'a, Tr: Tracker> PowerSeriesEndgame<'a, Tr> {
    /// Estimates the path's value at `target` (normally `t = 0`) from the live window.
    ///
    /// Samples are first refined in place to the final tolerance, which may
    /// leave the window partially refined when a refinement fails.
    pub fn compute_approximation_of_x_at_t0<T: HistoryScalar>(
        &mut self,
        target: &T,
    ) -> Result<Result<DVector<T>, SuccessCode>, EndgameError> {
        self.history.window::<T>().check_consistent()?;
        self.history.ensure_uniform_precision::<T>();

        let tracker = self.tracker;
        let tolerance = self.tolerances.final_tolerance;
        let window = self.history.window_mut::<T>();
        let times = window.times();
        for (sample, time) in window.samples_mut().iter_mut().zip(times.iter()) {
            match tracker.refine_sample(sample, time, tolerance) {
                Ok(refined) => *sample = refined,
                Err(code) => {
                    warn!(?code, "sample refinement failed");
                    return Ok(Err(code));
                }
            }
        }

        let derivatives = match self.compute_cycle_number::<T>()? {
            Ok(derivatives) => derivatives,
            Err(code) => return Ok(Err(code)),
        };

        let cycle_number = self.cycle_number;
        if cycle_number == 0 {
            return Err(EndgameError::ZeroCycleNumber);
        }
        self.summary.cycle_numbers.push(cycle_number);

        let window = self.history.window::<T>();
        let times: Vec<T> = window.times_ref().iter().cloned().collect();
        let samples: Vec<DVector<T>> = window.samples_ref().iter().cloned().collect();
        let (s_times, s_derivatives) = to_s_plane(&times, &derivatives, cycle_number);

        let count = self.endgame.num_sample_points.min(times.len());
        let s_target = target.pow_ratio(1, cycle_number as u32);
        trace!(cycle_number, count, "extrapolating in the s-plane");

        Ok(Ok(hermite_interpolate_and_solve(
            &s_target,
            count,
            &s_times,
            &samples,
            &s_derivatives,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endgame::EndgameConfig;
    use crate::equation_engine::EquationSystem;
    use crate::tracker::{PathTracker, TrackerSettings};
    use num_complex::Complex64;
    use std::collections::VecDeque;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn s_plane_rescaling() {
        let times = vec![c(0.25, 0.0), c(0.0625, 0.0)];
        let derivatives = vec![DVector::from_vec(vec![c(1.0, 0.0)]); 2];
        let (s_times, s_derivatives) = to_s_plane(&times, &derivatives, 2);
        assert!((s_times[0] - c(0.5, 0.0)).norm() < 1e-15);
        assert!((s_times[1] - c(0.25, 0.0)).norm() < 1e-15);
        // 2 · t^(1/2)
        assert!((s_derivatives[0][0] - c(1.0, 0.0)).norm() < 1e-15);
        assert!((s_derivatives[1][0] - c(0.5, 0.0)).norm() < 1e-15);

        let (unchanged_times, unchanged) = to_s_plane(&times, &derivatives, 1);
        assert_eq!(unchanged_times, times);
        assert_eq!(unchanged, derivatives);
    }

    #[test]
    fn extrapolates_square_root_branch() {
        // x(t) = 0.5 + sqrt(t) on (x - 0.5)^2 = t
        let system = EquationSystem::new(&["x"], "t", &["(x - 0.5)^2 - t"]).unwrap();
        let tracker = PathTracker::new(system, TrackerSettings::default());
        let mut config = EndgameConfig::default();
        config.seed = Some(3);
        config.tolerances.final_tolerance = 1e-13;
        let mut endgame = PowerSeriesEndgame::new(&tracker, config);

        let times: VecDeque<Complex64> = [0.1, 0.05, 0.025].iter().map(|&t| c(t, 0.0)).collect();
        // slightly off the path, so refinement has work to do
        let samples: VecDeque<DVector<Complex64>> = times
            .iter()
            .map(|t| DVector::from_vec(vec![c(0.5 + 1e-7, 0.0) + t.sqrt()]))
            .collect();
        endgame.history.set_times(times);
        endgame.history.set_samples(samples);

        let approximation = endgame
            .compute_approximation_of_x_at_t0(&c(0.0, 0.0))
            .unwrap()
            .unwrap();
        // x is a low-degree polynomial in t^(1/c) for c = 2, 4 and 6, all fitted exactly
        assert_eq!(endgame.cycle_number() % 2, 0);
        assert!((approximation[0] - c(0.5, 0.0)).norm() < 1e-9);
        assert_eq!(endgame.summary().cycle_numbers, vec![endgame.cycle_number()]);
    }

    #[test]
    fn refinement_failure_is_forwarded() {
        let system = EquationSystem::new(&["x"], "t", &["x^2 - t"]).unwrap();
        let tracker = PathTracker::new(system, TrackerSettings::default());
        let mut endgame = PowerSeriesEndgame::new(&tracker, EndgameConfig::default());
        for t in [0.1, 0.05, 0.0] {
            endgame.history.push(c(t, 0.0), DVector::from_vec(vec![c(0.0, 0.0)]));
        }
        let result = endgame.compute_approximation_of_x_at_t0(&c(0.0, 0.0));
        assert_eq!(result, Ok(Err(SuccessCode::MatrixSolveFailure)));
        assert!(endgame.summary().cycle_numbers.is_empty());
    }
}
