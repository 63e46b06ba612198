//! Hermite interpolation with first derivatives.

use nalgebra::DVector;

use crate::traits::ComplexScalar;

/// Evaluates at `target` the Hermite interpolant through the first `count`
/// nodes `(times[i], samples[i], derivatives[i])`.
///
/// Each node is doubled, giving a polynomial of degree `2·count − 1` in every
/// coordinate, built from a divided-difference table and evaluated in Newton
/// form. `count` is clamped to the shortest input.
pub fn hermite_interpolate_and_solve<T: ComplexScalar>(
    target: &T,
    count: usize,
    times: &[T],
    samples: &[DVector<T>],
    derivatives: &[DVector<T>],
) -> DVector<T> {
    let count = count
        .min(times.len())
        .min(samples.len())
        .min(derivatives.len());
    if count == 0 {
        return DVector::from_vec(Vec::new());
    }

    let dim = samples[0].len();
    let nodes: Vec<T> = (0..2 * count).map(|k| times[k / 2].clone()).collect();

    DVector::from_iterator(
        dim,
        (0..dim).map(|d| {
            let values: Vec<T> = (0..count).map(|i| samples[i][d].clone()).collect();
            let slopes: Vec<T> = (0..count).map(|i| derivatives[i][d].clone()).collect();
            interpolate_component(target, &nodes, &values, &slopes)
        }),
    )
}

fn interpolate_component<T: ComplexScalar>(target: &T, nodes: &[T], values: &[T], slopes: &[T]) -> T {
    let m = nodes.len();

    // table[k][j] = f[z_{k-j}, ..., z_k]
    let mut table: Vec<Vec<T>> = Vec::with_capacity(m);
    for k in 0..m {
        let mut row = Vec::with_capacity(k + 1);
        row.push(values[k / 2].clone());
        if k >= 1 {
            let first = if k % 2 == 1 {
                slopes[k / 2].clone()
            } else {
                (row[0].clone() - table[k - 1][0].clone()) / (nodes[k].clone() - nodes[k - 1].clone())
            };
            row.push(first);
        }
        for j in 2..=k {
            let entry = (row[j - 1].clone() - table[k - 1][j - 1].clone())
                / (nodes[k].clone() - nodes[k - j].clone());
            row.push(entry);
        }
        table.push(row);
    }

    let mut result = table[m - 1][m - 1].clone();
    for k in (0..m - 1).rev() {
        result = result * (target.clone() - nodes[k].clone()) + table[k][k].clone();
    }
    result
}
