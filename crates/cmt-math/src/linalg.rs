//! Dense linear algebra for the Gauss-Newton model update.
//!
//! LU factorization with partial pivoting; the systems here are tiny
//! (up to ~12 unknowns, one row larger under the trace constraint).

use ndarray::{Array1, Array2};

/// Pivot magnitude below which the matrix is treated as singular.
const PIVOT_TOL: f64 = 1e-12;

/// Solve A x = b by LU decomposition with partial pivoting.
///
/// Returns `None` when a pivot falls below tolerance, which the caller
/// reports as a singular Hessian rather than producing a garbage step.
pub fn lu_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return None;
    }

    let mut lu = a.clone();
    let mut x = b.clone();

    for col in 0..n {
        // Partial pivot: largest magnitude in the remaining column
        let mut pivot_row = col;
        let mut pivot_mag = lu[[col, col]].abs();
        for row in (col + 1)..n {
            let mag = lu[[row, col]].abs();
            if mag > pivot_mag {
                pivot_mag = mag;
                pivot_row = row;
            }
        }
        if !pivot_mag.is_finite() || pivot_mag < PIVOT_TOL {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                lu.swap([col, k], [pivot_row, k]);
            }
            x.swap(col, pivot_row);
        }

        // Eliminate below the pivot
        for row in (col + 1)..n {
            let factor = lu[[row, col]] / lu[[col, col]];
            lu[[row, col]] = 0.0;
            for k in (col + 1)..n {
                lu[[row, k]] -= factor * lu[[col, k]];
            }
            x[row] -= factor * x[col];
        }
    }

    // Back substitution
    for row in (0..n).rev() {
        let mut sum = x[row];
        for k in (row + 1)..n {
            sum -= lu[[row, k]] * x[k];
        }
        x[row] = sum / lu[[row, row]];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(x)
}

/// Largest absolute diagonal entry, used to scale the damping term.
pub fn max_abs_diag(a: &Array2<f64>) -> f64 {
    let n = a.nrows().min(a.ncols());
    let mut max = 0.0f64;
    for i in 0..n {
        max = max.max(a[[i, i]].abs());
    }
    max
}
