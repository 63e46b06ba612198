//! Dense linear algebra over any `ComplexScalar`.
//!
//! `nalgebra` supplies the storage; the arithmetic here only needs the owned
//! operators of `ComplexScalar`, so the same code runs on `Complex64` and on
//! MPC-backed values without requiring `nalgebra::ComplexField`.

use nalgebra::{DMatrix, DVector};

use crate::traits::{ComplexScalar, FIXED_DIGITS};

/// Solves `matrix · x = rhs` by Gaussian elimination with partial pivoting.
///
/// Returns `None` for non-square or size-mismatched input and when a pivot
/// vanishes or is not finite.
pub fn solve<T: ComplexScalar>(matrix: &DMatrix<T>, rhs: &DVector<T>) -> Option<DVector<T>> {
    let n = matrix.nrows();
    if matrix.ncols() != n || rhs.len() != n {
        return None;
    }

    let mut rows: Vec<Vec<T>> = (0..n)
        .map(|i| (0..n).map(|j| matrix[(i, j)].clone()).collect())
        .collect();
    let mut b: Vec<T> = rhs.iter().cloned().collect();

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_size = rows[col][col].modulus();
        for row in (col + 1)..n {
            let size = rows[row][col].modulus();
            if size > pivot_size {
                pivot_row = row;
                pivot_size = size;
            }
        }
        if !(pivot_size > 0.0) || !pivot_size.is_finite() {
            return None;
        }
        rows.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = rows[row][col].clone() / rows[col][col].clone();
            for k in col..n {
                let update = factor.clone() * rows[col][k].clone();
                rows[row][k] = rows[row][k].clone() - update;
            }
            b[row] = b[row].clone() - factor * b[col].clone();
        }
    }

    let mut x: Vec<T> = b.clone();
    for i in (0..n).rev() {
        let mut acc = b[i].clone();
        for k in (i + 1)..n {
            acc = acc - rows[i][k].clone() * x[k].clone();
        }
        x[i] = acc / rows[i][i].clone();
    }

    Some(DVector::from_vec(x))
}

/// Euclidean norm, accumulated in `f64`.
pub fn norm<T: ComplexScalar>(v: &DVector<T>) -> f64 {
    v.iter()
        .map(|c| {
            let m = c.modulus();
            m * m
        })
        .sum::<f64>()
        .sqrt()
}

/// Plain bilinear pairing `Σ aᵢ·bᵢ`. Neither argument is conjugated.
pub fn bilinear_dot<T: ComplexScalar>(a: &DVector<T>, b: &DVector<T>) -> T {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.clone() * y.clone())
        .reduce(|acc, term| acc + term)
        .unwrap_or_else(|| T::zero(FIXED_DIGITS))
}

/// Componentwise `a - b`.
pub fn difference<T: ComplexScalar>(a: &DVector<T>, b: &DVector<T>) -> DVector<T> {
    DVector::from_iterator(
        a.len(),
        a.iter().zip(b.iter()).map(|(x, y)| x.clone() - y.clone()),
    )
}

/// Computes `x + factor · y`.
pub fn axpy<T: ComplexScalar>(x: &DVector<T>, factor: &T, y: &DVector<T>) -> DVector<T> {
    DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(y.iter())
            .map(|(a, b)| a.clone() + factor.clone() * b.clone()),
    )
}

pub fn scaled<T: ComplexScalar>(v: &DVector<T>, factor: &T) -> DVector<T> {
    v.map(|c| c * factor.clone())
}

pub fn negated<T: ComplexScalar>(v: &DVector<T>) -> DVector<T> {
    v.map(|c| -c)
}
