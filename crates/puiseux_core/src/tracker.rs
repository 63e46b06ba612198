use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::endgame::SuccessCode;
use crate::linalg::{axpy, difference, norm, solve};
use crate::traits::{ComplexScalar, HomotopySystem, Tracker};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    /// Converged once the norm of the Newton update drops below this.
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 5,
            damping: 1.0,
            tolerance: 1e-10,
        }
    }
}

/// Step sizes are fractions of the segment between the start and end times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    pub initial_step_size: f64,
    pub min_step_size: f64,
    pub max_step_size: f64,
    pub max_num_steps: usize,
    pub step_growth: f64,
    pub step_shrink: f64,
    pub consecutive_successes_to_grow: usize,
    /// Paths whose points exceed this norm are reported as going to infinity.
    pub path_truncation_threshold: f64,
    pub newton: NewtonSettings,
    /// Newton iterations allowed when polishing a sample at fixed time.
    pub refine_max_steps: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            initial_step_size: 0.1,
            min_step_size: 1e-12,
            max_step_size: 1.0,
            max_num_steps: 10_000,
            step_growth: 2.0,
            step_shrink: 0.5,
            consecutive_successes_to_grow: 3,
            path_truncation_threshold: 1e8,
            newton: NewtonSettings::default(),
            refine_max_steps: 10,
        }
    }
}

/// Predictor-corrector tracker along the straight segment
/// `t(h) = t₀ + h·(t₁ − t₀)`, `h ∈ [0, 1]`.
#[derive(Debug, Clone)]
pub struct PathTracker<S> {
    system: S,
    settings: TrackerSettings,
}

impl<S: HomotopySystem> PathTracker<S> {
    pub fn new(system: S, settings: TrackerSettings) -> Self {
        Self { system, settings }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// One classic Runge-Kutta 4th order step of the Davidenko equation
    /// `dx/dt = −J⁻¹ · ∂H/∂t`, with a complex time step `dt`.
    fn predict<T: ComplexScalar>(
        &self,
        t: &T,
        x: &DVector<T>,
        k1: &DVector<T>,
        dt: &T,
    ) -> Option<DVector<T>> {
        let half_dt = dt.scaled_by(0.5);
        let sixth_dt = dt.scaled_by(1.0 / 6.0);
        let t_half = t.clone() + half_dt.clone();

        // k2 = f(t + dt/2, x + dt*k1/2)
        let k2 = self.system.path_derivative(&axpy(x, &half_dt, k1), &t_half)?;

        // k3 = f(t + dt/2, x + dt*k2/2)
        let k3 = self.system.path_derivative(&axpy(x, &half_dt, &k2), &t_half)?;

        // k4 = f(t + dt, x + dt*k3)
        let k4 = self
            .system
            .path_derivative(&axpy(x, dt, &k3), &(t.clone() + dt.clone()))?;

        // x_next = x + dt/6 * (k1 + 2k2 + 2k3 + k4)
        let slope = DVector::from_iterator(
            x.len(),
            (0..x.len()).map(|i| {
                k1[i].clone() + k2[i].scaled_by(2.0) + k3[i].scaled_by(2.0) + k4[i].clone()
            }),
        );
        Some(axpy(x, &sixth_dt, &slope))
    }

    /// Damped Newton iteration on `H(·, t) = 0`.
    fn correct<T: ComplexScalar>(
        &self,
        start: DVector<T>,
        t: &T,
        max_steps: usize,
        tolerance: f64,
    ) -> Result<DVector<T>, SuccessCode> {
        let mut state = start;
        let damping = T::from_parts(self.settings.newton.damping, 0.0, t.digits());
        for _ in 0..max_steps {
            let residual = self.system.evaluate(&state, t);
            let jacobian = self.system.jacobian(&state, t);
            let delta = solve(&jacobian, &residual).ok_or(SuccessCode::MatrixSolveFailure)?;
            let update = delta.map(|d| d * damping.clone());
            state = difference(&state, &update);
            if norm(&update) < tolerance {
                return Ok(state);
            }
        }
        Err(SuccessCode::FailedToConverge)
    }
}

impl<S: HomotopySystem> Tracker for PathTracker<S> {
    type System = S;

    fn system(&self) -> &S {
        &self.system
    }

    fn track_path<T: ComplexScalar>(
        &self,
        start_time: &T,
        end_time: &T,
        start_point: &DVector<T>,
    ) -> Result<DVector<T>, SuccessCode> {
        let settings = &self.settings;
        let span = end_time.clone() - start_time.clone();
        let time_at = |h: f64| start_time.clone() + span.scaled_by(h);

        let mut x = start_point.clone();
        let mut h = 0.0;
        let mut step = settings.initial_step_size.min(settings.max_step_size);
        let mut successes = 0usize;
        let mut num_steps = 0usize;

        while h < 1.0 {
            if num_steps >= settings.max_num_steps {
                debug!(num_steps, h, "tracker exhausted its step budget");
                return Err(SuccessCode::MaxNumStepsTaken);
            }
            num_steps += 1;

            let last = step >= 1.0 - h;
            let t_current = time_at(h);
            let t_next = if last { end_time.clone() } else { time_at(h + step) };
            let dt = t_next.clone() - t_current.clone();

            let k1 = self
                .system
                .path_derivative(&x, &t_current)
                .ok_or(SuccessCode::MatrixSolveFailure)?;

            let attempt = self
                .predict(&t_current, &x, &k1, &dt)
                .ok_or(SuccessCode::MatrixSolveFailure)
                .and_then(|predicted| {
                    self.correct(
                        predicted,
                        &t_next,
                        settings.newton.max_steps,
                        settings.newton.tolerance,
                    )
                });

            match attempt {
                Ok(next) => {
                    x = next;
                    h = if last { 1.0 } else { h + step };
                    successes += 1;
                    if successes >= settings.consecutive_successes_to_grow {
                        step = (step * settings.step_growth).min(settings.max_step_size);
                        successes = 0;
                    }
                    if norm(&x) > settings.path_truncation_threshold {
                        debug!(h, "path norm exceeded truncation threshold");
                        return Err(SuccessCode::GoingToInfinity);
                    }
                }
                Err(code) => {
                    trace!(?code, h, step, "step rejected");
                    successes = 0;
                    step *= settings.step_shrink;
                    if step < settings.min_step_size {
                        return Err(SuccessCode::MinStepSizeReached);
                    }
                }
            }
        }

        Ok(x)
    }

    fn refine_sample<T: ComplexScalar>(
        &self,
        point: &DVector<T>,
        time: &T,
        tolerance: f64,
    ) -> Result<DVector<T>, SuccessCode> {
        self.correct(point.clone(), time, self.settings.refine_max_steps, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation_engine::EquationSystem;
    use crate::traits::Arithmetic;
    use num_complex::Complex64;
    use rug::Complex;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn square_root_tracker() -> PathTracker<EquationSystem> {
        let system = EquationSystem::new(&["x"], "t", &["x^2 - (4 + t)"]).unwrap();
        PathTracker::new(system, TrackerSettings::default())
    }

    #[test]
    fn tracks_to_known_endpoint() {
        let tracker = square_root_tracker();
        let start = DVector::from_vec(vec![c(4.1f64.sqrt(), 0.0)]);
        let end = tracker.track_path(&c(0.1, 0.0), &c(0.05, 0.0), &start).unwrap();
        assert!((end[0] - c(4.05f64.sqrt(), 0.0)).norm() < 1e-10);
    }

    #[test]
    fn tracks_along_complex_segment() {
        let tracker = square_root_tracker();
        let start = DVector::from_vec(vec![c(4.1f64.sqrt(), 0.0)]);
        let end_time = c(0.05, 0.05);
        let end = tracker.track_path(&c(0.1, 0.0), &end_time, &start).unwrap();
        let expected = (c(4.0, 0.0) + end_time).sqrt();
        assert!((end[0] - expected).norm() < 1e-10);
    }

    #[test]
    fn tracks_in_multiple_precision() {
        let tracker = square_root_tracker();
        let start_time = <Complex as ComplexScalar>::from_parts(0.1, 0.0, 30);
        let end_time = <Complex as ComplexScalar>::from_parts(0.05, 0.0, 30);
        let start = DVector::from_vec(vec![<Complex as ComplexScalar>::from_parts(4.1f64.sqrt(), 0.0, 30)]);
        let end = tracker.track_path(&start_time, &end_time, &start).unwrap();
        assert_eq!(end[0].digits(), 30);
        assert!((end[0].to_c64() - c(4.05f64.sqrt(), 0.0)).norm() < 1e-10);
    }

    #[test]
    fn refinement_converges() {
        let tracker = square_root_tracker();
        let rough = DVector::from_vec(vec![c(2.03, 0.001)]);
        let refined = tracker.refine_sample(&rough, &c(0.05, 0.0), 1e-13).unwrap();
        assert!((refined[0] - c(4.05f64.sqrt(), 0.0)).norm() < 1e-13);
    }

    #[test]
    fn refinement_reports_singular_jacobian() {
        let tracker = square_root_tracker();
        let at_branch_point = DVector::from_vec(vec![c(0.0, 0.0)]);
        assert_eq!(
            tracker.refine_sample(&at_branch_point, &c(0.0, 0.0), 1e-12),
            Err(SuccessCode::MatrixSolveFailure)
        );
    }

    #[test]
    fn diverging_path_is_truncated() {
        let system = EquationSystem::new(&["x"], "t", &["t*x - 1"]).unwrap();
        let settings = TrackerSettings {
            path_truncation_threshold: 1e4,
            ..TrackerSettings::default()
        };
        let tracker = PathTracker::new(system, settings);
        let start = DVector::from_vec(vec![c(10.0, 0.0)]);
        let result = tracker.track_path(&c(0.1, 0.0), &c(1e-12, 0.0), &start);
        assert_eq!(result, Err(SuccessCode::GoingToInfinity));
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = TrackerSettings {
            max_num_steps: 2,
            initial_step_size: 0.01,
            ..TrackerSettings::default()
        };
        let system = EquationSystem::new(&["x"], "t", &["x^2 - (4 + t)"]).unwrap();
        let tracker = PathTracker::new(system, settings);
        let start = DVector::from_vec(vec![c(4.1f64.sqrt(), 0.0)]);
        assert_eq!(
            tracker.track_path(&c(0.1, 0.0), &c(0.05, 0.0), &start),
            Err(SuccessCode::MaxNumStepsTaken)
        );
    }

    #[test]
    fn gathers_geometric_samples() {
        let tracker = square_root_tracker();
        let start = DVector::from_vec(vec![c(4.1f64.sqrt(), 0.0)]);
        let (times, samples) = tracker
            .gather_initial_samples(&c(0.1, 0.0), &start, 0.5, 3)
            .unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(samples.len(), 3);
        assert_eq!(times[2], c(0.025, 0.0));
        assert!((samples[2][0] - c(4.025f64.sqrt(), 0.0)).norm() < 1e-10);
    }
}
