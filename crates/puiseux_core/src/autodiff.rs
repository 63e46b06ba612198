use crate::traits::{Arithmetic, ComplexScalar};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Complex dual number for forward-mode AD.
/// val: function value
/// eps: derivative along the seeded direction
#[derive(Debug, Clone, PartialEq)]
pub struct Dual<T> {
    pub val: T,
    pub eps: T,
}

impl<T: ComplexScalar> Dual<T> {
    pub fn new(val: T, eps: T) -> Self {
        Self { val, eps }
    }

    /// A value that does not vary with the seeded direction.
    pub fn constant(val: T) -> Self {
        let eps = T::zero(val.digits());
        Self { val, eps }
    }

    /// The seeded coordinate itself (derivative 1).
    pub fn variable(val: T) -> Self {
        let eps = T::one(val.digits());
        Self { val, eps }
    }
}

impl<T: ComplexScalar> Add for Dual<T> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl<T: ComplexScalar> Sub for Dual<T> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl<T: ComplexScalar> Mul for Dual<T> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let eps = self.val.clone() * rhs.eps + self.eps * rhs.val.clone();
        Self::new(self.val * rhs.val, eps)
    }
}

impl<T: ComplexScalar> Div for Dual<T> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val.clone() * rhs.val.clone();
        let eps = (self.eps * rhs.val.clone() - self.val.clone() * rhs.eps) / denom;
        Self::new(self.val / rhs.val, eps)
    }
}

impl<T: ComplexScalar> Neg for Dual<T> {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl<T: ComplexScalar> Arithmetic for Dual<T> {
    fn literal(text: &str, digits: u32) -> Self {
        Self::constant(T::literal(text, digits))
    }

    fn imaginary_unit(digits: u32) -> Self {
        Self::constant(T::imaginary_unit(digits))
    }

    fn digits(&self) -> u32 {
        self.val.digits()
    }
}
