//! Smoothing and standardisation applied to daily traffic before peak finding

use crate::{mean, std_dev, MathError, Result};
use std::collections::VecDeque;

/// Mean of the last `period` daily values
///
/// Partial windows are averaged over what has been seen, so the first
/// output equals the first input (pandas' `min_periods=1`).
#[derive(Debug, Clone)]
pub struct TrailingMean {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl TrailingMean {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(MathError::InvalidInput(
                "Smoothing window must be at least one day".to_string(),
            ));
        }
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        })
    }

    /// Push one day and return the mean of the current window
    pub fn push(&mut self, value: f64) -> f64 {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            self.sum -= self.window.pop_front().unwrap_or(0.0);
        }
        self.sum / self.window.len() as f64
    }
}

/// Trailing rolling mean over `window` values, output length equals input length
pub fn rolling_mean(data: &[f64], window: usize) -> Result<Vec<f64>> {
    let mut trailing = TrailingMean::new(window)?;
    Ok(data.iter().map(|&v| trailing.push(v)).collect())
}

/// Standardise a series to zero mean and unit sample standard deviation
///
/// A constant series (standard deviation of zero) maps to all zeros.
pub fn z_score(data: &[f64]) -> Vec<f64> {
    let m = match mean(data) {
        Some(m) => m,
        None => return Vec::new(),
    };
    let sd = std_dev(data, 1).unwrap_or(0.0);
    if sd == 0.0 || !sd.is_finite() {
        return vec![0.0; data.len()];
    }
    data.iter().map(|x| (x - m) / sd).collect()
}

/// Rolling mean (window 3) followed by a z-score, the preprocessing used
/// before looking for traffic peaks
pub fn smooth_and_standardise(data: &[f64]) -> Result<Vec<f64>> {
    let smoothed = rolling_mean(data, 3)?;
    Ok(z_score(&smoothed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trailing_mean_partial_window() {
        let mut trailing = TrailingMean::new(3).unwrap();
        let means: Vec<f64> = [3.0, 5.0, 7.0, 9.0].iter().map(|&v| trailing.push(v)).collect();
        assert_eq!(means, vec![3.0, 4.0, 5.0, 7.0]);
        assert!(TrailingMean::new(0).is_err());
    }

    #[test]
    fn test_rolling_mean_matches_length() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        assert_eq!(out.len(), 5);
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[1], 1.5);
        assert_relative_eq!(out[4], 4.0);
    }

    #[test]
    fn test_z_score_constant_series_is_zero() {
        assert_eq!(z_score(&[4.0, 4.0, 4.0]), vec![0.0, 0.0, 0.0]);
        assert!(z_score(&[]).is_empty());
    }

    #[test]
    fn test_z_score_is_standardised() {
        let z = z_score(&[1.0, 2.0, 3.0, 4.0, 10.0]);
        assert_relative_eq!(mean(&z).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(std_dev(&z, 1).unwrap(), 1.0, epsilon = 1e-12);
    }
}
