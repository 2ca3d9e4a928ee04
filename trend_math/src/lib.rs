//! # Trend Math
//!
//! Numeric kernels used by the page-view analysis engines.
//! Nothing in this crate touches the filesystem; every function works on
//! plain slices so the engines can feed it cleaned series.

use thiserror::Error;

// Kernel modules
pub mod correlation;
pub mod fill;
pub mod linalg;
pub mod peaks;
pub mod smoothing;

/// Errors that can occur in trend calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for trend math operations
pub type Result<T> = std::result::Result<T, MathError>;

/// Arithmetic mean, `None` for an empty slice
pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Variance with `ddof` delta degrees of freedom (0 = population, 1 = sample)
pub fn variance(data: &[f64], ddof: usize) -> Option<f64> {
    if data.len() <= ddof {
        return None;
    }
    let m = mean(data)?;
    let sum_sq = data.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    Some(sum_sq / (data.len() - ddof) as f64)
}

/// Standard deviation with `ddof` delta degrees of freedom
pub fn std_dev(data: &[f64], ddof: usize) -> Option<f64> {
    variance(data, ddof).map(f64::sqrt)
}

pub(crate) fn ensure_finite(data: &[f64], what: &str) -> Result<()> {
    if data.iter().any(|x| !x.is_finite()) {
        return Err(MathError::InvalidInput(format!(
            "{} contains NaN or infinite values",
            what
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_variance() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&data).unwrap(), 5.0);
        assert_relative_eq!(variance(&data, 0).unwrap(), 4.0);
        assert_relative_eq!(std_dev(&data, 0).unwrap(), 2.0);
        assert!(variance(&data, 1).unwrap() > 4.0);
    }

    #[test]
    fn test_empty_statistics() {
        assert!(mean(&[]).is_none());
        assert!(variance(&[1.0], 1).is_none());
    }
}
