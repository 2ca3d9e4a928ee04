//! Small dense linear algebra for regression fits

use crate::{MathError, Result};

const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(MathError::InvalidInput(format!(
            "Expected a {}x{} system",
            n, n
        )));
    }

    for col in 0..n {
        // Pick the largest pivot in this column
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_TOLERANCE {
            return Err(MathError::CalculationError(
                "Matrix is singular or ill-conditioned".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum::<f64>();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(MathError::CalculationError(
            "Solution is not finite".to_string(),
        ));
    }
    Ok(x)
}

/// Ordinary least squares through the normal equations
///
/// `rows` holds one regressor vector per observation; no intercept is added.
pub fn least_squares(rows: &[Vec<f64>], targets: &[f64]) -> Result<Vec<f64>> {
    if rows.len() != targets.len() {
        return Err(MathError::InvalidInput(
            "Regressor and target counts differ".to_string(),
        ));
    }
    let k = match rows.first() {
        Some(row) => row.len(),
        None => {
            return Err(MathError::InsufficientData(
                "No observations to regress".to_string(),
            ))
        }
    };
    if rows.len() < k {
        return Err(MathError::InsufficientData(format!(
            "Need at least {} observations, have {}",
            k,
            rows.len()
        )));
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &y) in rows.iter().zip(targets) {
        for i in 0..k {
            xty[i] += row[i] * y;
            for j in 0..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }
    solve(xtx, xty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_small_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve(a, vec![3.0, 5.0]).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_error() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(matches!(
            solve(a, vec![1.0, 2.0]),
            Err(MathError::CalculationError(_))
        ));
    }

    #[test]
    fn test_least_squares_recovers_coefficients() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, ((i * i) % 7) as f64])
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] - 0.5 * r[1]).collect();
        let beta = least_squares(&rows, &targets).unwrap();
        assert_relative_eq!(beta[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(beta[1], -0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_least_squares_needs_rows() {
        assert!(least_squares(&[], &[]).is_err());
        assert!(least_squares(&[vec![1.0, 2.0]], &[1.0]).is_err());
    }
}
