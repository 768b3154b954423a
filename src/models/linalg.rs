//! Dense linear algebra for the least-squares family

use crate::error::{Result, SolverError};
use ndarray::{Array1, Array2, Axis};

fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn cholesky_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// Solve a symmetric positive-definite system `A x = b` by Cholesky
/// decomposition, retrying once with a small diagonal ridge when `A` is
/// not numerically positive definite.
pub fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    if n == 0 {
        return Some(Array1::zeros(0));
    }
    if let Some(l) = cholesky_factor(a) {
        return Some(cholesky_substitute(&l, b));
    }
    let mut regularized = a.clone();
    let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>().max(1e-12) / n as f64;
    for k in 0..n {
        regularized[[k, k]] += ridge;
    }
    cholesky_factor(&regularized).map(|l| cholesky_substitute(&l, b))
}

/// Gauss-Jordan inversion with partial pivoting
pub fn matrix_inverse(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }
    let mut aug = Array2::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }
        if max_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [max_row, j]);
            }
        }
        if aug[[col, col]].abs() < 1e-10 {
            return None;
        }
        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..2 * n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    let mut inv = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            inv[[i, j]] = aug[[i, n + j]];
        }
    }
    Some(inv)
}

/// Solve `(A + alpha I) x = b`, falling back to explicit inversion
pub fn solve_regularized(a: &Array2<f64>, b: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let mut system = a.clone();
    for i in 0..system.nrows() {
        system[[i, i]] += alpha;
    }
    if let Some(x) = cholesky_solve(&system, b) {
        return Ok(x);
    }
    matrix_inverse(&system)
        .map(|inv| inv.dot(b))
        .ok_or_else(|| SolverError::ComputationError("singular system".to_string()))
}

/// Least squares via the normal equations, with an optional L2 penalty
pub fn least_squares(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Result<Array1<f64>> {
    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);
    solve_regularized(&xtx, &xty, alpha)
}

/// Multi-output least squares: one coefficient column per column of `y`
pub fn least_squares_multi(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    let xtx = x.t().dot(x);
    let mut coefficients = Array2::zeros((x.ncols(), y.ncols()));
    for (j, target) in y.axis_iter(Axis(1)).enumerate() {
        let xty = x.t().dot(&target);
        let solved = solve_regularized(&xtx, &xty, 0.0)?;
        coefficients.column_mut(j).assign(&solved);
    }
    Ok(coefficients)
}

/// Weighted column means
pub fn weighted_mean_axis0(x: &Array2<f64>, w: &Array1<f64>) -> Array1<f64> {
    let total = w.sum();
    if total <= 0.0 {
        return x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
    }
    x.t().dot(w) / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cholesky_solve() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = cholesky_solve(&a, &b).unwrap();
        let back = a.dot(&x);
        assert!((back[0] - 2.0).abs() < 1e-10);
        assert!((back[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_inverse() {
        let m = array![[0.0, 1.0], [2.0, 0.0]];
        let inv = matrix_inverse(&m).unwrap();
        let eye = m.dot(&inv);
        assert!((eye[[0, 0]] - 1.0).abs() < 1e-10);
        assert!(eye[[0, 1]].abs() < 1e-10);
        assert!(matrix_inverse(&array![[1.0, 2.0], [2.0, 4.0]]).is_none());
    }

    #[test]
    fn test_least_squares_exact_line() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0]];
        let y = array![1.0, 3.0, 5.0];
        let beta = least_squares(&x, &y, 0.0).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-8);
        assert!((beta[1] - 2.0).abs() < 1e-8);
    }
}
