use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::Zero;
use rand::Rng;
use rug::ops::Pow;
use rug::{Complex, Float};
use std::collections::VecDeque;
use std::f64::consts::{LOG10_2, LOG2_10};
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::endgame::SuccessCode;

/// Decimal digits carried by an `f64`-backed complex number.
pub const FIXED_DIGITS: u32 = 16;

/// Converts a decimal digit count to the binary precision used by MPFR.
pub fn digits_to_bits(digits: u32) -> u32 {
    ((digits as f64 * LOG2_10).ceil() as u32).max(2)
}

/// Converts an MPFR binary precision back to whole decimal digits.
pub fn bits_to_digits(bits: u32) -> u32 {
    (bits as f64 * LOG10_2 + 1e-9).floor() as u32
}

/// Field arithmetic shared by every value the equation VM can operate on:
/// plain complex scalars and dual numbers built on top of them.
pub trait Arithmetic:
    Clone
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Builds a value from a validated decimal literal at `digits` decimal digits.
    fn literal(text: &str, digits: u32) -> Self;

    /// The imaginary unit at `digits` decimal digits.
    fn imaginary_unit(digits: u32) -> Self;

    /// Working precision of this value, in decimal digits.
    fn digits(&self) -> u32;
}

/// A complex number type the endgame can run on.
///
/// Implemented for `Complex64` (fixed precision) and `rug::Complex`
/// (arbitrary precision). Precision travels with each value; constructors take
/// it explicitly as a digit count, so no ambient default precision exists.
pub trait ComplexScalar: Arithmetic + Debug + PartialEq + 'static {
    fn from_parts(re: f64, im: f64, digits: u32) -> Self;

    fn from_c64(value: Complex64, digits: u32) -> Self {
        Self::from_parts(value.re, value.im, digits)
    }

    fn zero(digits: u32) -> Self {
        Self::from_parts(0.0, 0.0, digits)
    }

    fn one(digits: u32) -> Self {
        Self::from_parts(1.0, 0.0, digits)
    }

    /// Narrows to machine precision (rounding).
    fn to_c64(&self) -> Complex64;

    /// Changes the storage precision in place. A no-op for fixed precision.
    fn set_digits(&mut self, digits: u32);

    /// Modulus as an `f64`.
    fn modulus(&self) -> f64;

    fn is_zero(&self) -> bool;

    /// Principal branch of `self^(numerator / denominator)`, with the exponent
    /// formed at the value's own precision.
    fn pow_ratio(&self, numerator: u32, denominator: u32) -> Self;

    /// Draws real and imaginary parts uniformly from `[-1, 1)`.
    fn random<R: Rng + ?Sized>(rng: &mut R, digits: u32) -> Self {
        let re = rng.gen_range(-1.0..1.0);
        let im = rng.gen_range(-1.0..1.0);
        Self::from_parts(re, im, digits)
    }

    fn scaled_by(&self, factor: f64) -> Self {
        self.clone() * Self::from_parts(factor, 0.0, self.digits())
    }
}

impl Arithmetic for Complex64 {
    fn literal(text: &str, _digits: u32) -> Self {
        text.parse::<f64>()
            .map(|v| Complex64::new(v, 0.0))
            .unwrap_or_default()
    }

    fn imaginary_unit(_digits: u32) -> Self {
        Complex64::new(0.0, 1.0)
    }

    fn digits(&self) -> u32 {
        FIXED_DIGITS
    }
}

impl ComplexScalar for Complex64 {
    fn from_parts(re: f64, im: f64, _digits: u32) -> Self {
        Complex64::new(re, im)
    }

    fn to_c64(&self) -> Complex64 {
        *self
    }

    fn set_digits(&mut self, _digits: u32) {}

    fn modulus(&self) -> f64 {
        self.norm()
    }

    fn is_zero(&self) -> bool {
        <Complex64 as Zero>::is_zero(self)
    }

    fn pow_ratio(&self, numerator: u32, denominator: u32) -> Self {
        if numerator == 0 {
            return Complex64::new(1.0, 0.0);
        }
        if ComplexScalar::is_zero(self) {
            return Complex64::new(0.0, 0.0);
        }
        self.powf(numerator as f64 / denominator as f64)
    }
}

impl Arithmetic for Complex {
    fn literal(text: &str, digits: u32) -> Self {
        let bits = digits_to_bits(digits);
        match Float::parse(text) {
            Ok(parsed) => Complex::with_val(bits, (Float::with_val(bits, parsed), 0)),
            Err(_) => Complex::new(bits),
        }
    }

    fn imaginary_unit(digits: u32) -> Self {
        Complex::with_val(digits_to_bits(digits), (0, 1))
    }

    fn digits(&self) -> u32 {
        bits_to_digits(self.prec().0)
    }
}

impl ComplexScalar for Complex {
    fn from_parts(re: f64, im: f64, digits: u32) -> Self {
        Complex::with_val(digits_to_bits(digits), (re, im))
    }

    fn to_c64(&self) -> Complex64 {
        Complex64::new(self.real().to_f64(), self.imag().to_f64())
    }

    fn set_digits(&mut self, digits: u32) {
        self.set_prec(digits_to_bits(digits));
    }

    fn modulus(&self) -> f64 {
        Float::with_val(self.prec().0, self.abs_ref()).to_f64()
    }

    fn is_zero(&self) -> bool {
        self.real().is_zero() && self.imag().is_zero()
    }

    fn pow_ratio(&self, numerator: u32, denominator: u32) -> Self {
        let bits = self.prec().0;
        if numerator == 0 {
            return Complex::with_val(bits, (1, 0));
        }
        if ComplexScalar::is_zero(self) {
            return Complex::new(bits);
        }
        let exponent = Complex::with_val(bits, (Float::with_val(bits, numerator) / denominator, 0));
        self.clone().pow(&exponent)
    }
}

/// A square polynomial homotopy `H(x, t) = 0` in `num_variables` unknowns.
pub trait HomotopySystem {
    /// Returns the number of (affine or homogeneous) variables.
    fn num_variables(&self) -> usize;

    /// Evaluates `H(x, t)`.
    fn evaluate<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DVector<T>;

    /// Computes `∂H/∂x` at `(x, t)`.
    fn jacobian<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DMatrix<T>;

    /// Computes `∂H/∂t` at `(x, t)`.
    fn time_derivative<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DVector<T>;

    /// Maps a point to affine coordinates for magnitude checks.
    fn dehomogenize_point<T: ComplexScalar>(&self, x: &DVector<T>) -> DVector<T>;

    /// Tangent of the solution path, `dx/dt = −J⁻¹ · ∂H/∂t`.
    /// `None` when the Jacobian is singular.
    fn path_derivative<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> Option<DVector<T>> {
        let jacobian = self.jacobian(x, t);
        let dh_dt = self.time_derivative(x, t);
        crate::linalg::solve(&jacobian, &dh_dt).map(|v| crate::linalg::negated(&v))
    }
}

/// Moves points along a homotopy path between two times.
pub trait Tracker {
    type System: HomotopySystem;

    fn system(&self) -> &Self::System;

    /// Tracks `start_point` from `start_time` to `end_time`.
    fn track_path<T: ComplexScalar>(
        &self,
        start_time: &T,
        end_time: &T,
        start_point: &DVector<T>,
    ) -> Result<DVector<T>, SuccessCode>;

    /// Polishes `point` at fixed `time` until the Newton update drops below `tolerance`.
    fn refine_sample<T: ComplexScalar>(
        &self,
        point: &DVector<T>,
        time: &T,
        tolerance: f64,
    ) -> Result<DVector<T>, SuccessCode>;

    /// Collects `count` samples at times `start_time · sample_factor^k`, oldest first.
    fn gather_initial_samples<T: ComplexScalar>(
        &self,
        start_time: &T,
        start_point: &DVector<T>,
        sample_factor: f64,
        count: usize,
    ) -> Result<(VecDeque<T>, VecDeque<DVector<T>>), SuccessCode> {
        let mut times = VecDeque::with_capacity(count);
        let mut samples = VecDeque::with_capacity(count);
        times.push_back(start_time.clone());
        samples.push_back(start_point.clone());

        for _ in 1..count {
            let last = times.len() - 1;
            let next_time = times[last].scaled_by(sample_factor);
            let next_sample = self.track_path(&times[last], &next_time, &samples[last])?;
            times.push_back(next_time);
            samples.push_back(next_sample);
        }

        Ok((times, samples))
    }
}
