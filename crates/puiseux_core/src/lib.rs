//! The `puiseux_core` crate provides the power series endgame for numerical
//! homotopy continuation: given a solution path tracked to a small time, it
//! estimates the path's limit at `t = 0`, including singular limits where the
//! path has a nontrivial cycle number.
//!
//! Every numerical routine is generic over `ComplexScalar`, which is implemented
//! for `Complex64` (fixed precision) and `rug::Complex` (arbitrary precision).
//!
//! Key components:
//! - **Traits**: `ComplexScalar` (scalar abstraction), `HomotopySystem` (the homotopy), `Tracker` (path tracking).
//! - **Equation Engine**: A bytecode VM evaluating polynomial homotopies at either precision.
//! - **Autodiff**: Dual numbers for exact Jacobians and time derivatives.
//! - **Tracker**: An RK4 predictor with a Newton corrector.
//! - **Endgame**: Sample history, cycle number detection, Hermite extrapolation and the control loop.

pub mod autodiff;
pub mod endgame;
pub mod equation_engine;
pub mod interpolation;
pub mod linalg;
pub mod tracker;
pub mod traits;

pub use endgame::{
    EndgameConfig, EndgameError, Point, PowerSeriesEndgame, PrecisionMode, RunSummary, SuccessCode,
};
pub use equation_engine::EquationSystem;
pub use tracker::{PathTracker, TrackerSettings};
pub use traits::{ComplexScalar, HomotopySystem, Tracker};
