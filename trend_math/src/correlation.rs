//! Auto- and cross-correlation kernels

use crate::{ensure_finite, mean, std_dev, MathError, Result};

/// Autocorrelation of the trailing `window` observations at lags `0..n`
///
/// The window is mean-centred and the raw self-correlation is divided by
/// `n * variance`, so lag 0 is exactly 1.0. `n` is `min(window, len)`.
pub fn autocorrelation(data: &[f64], window: usize) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(MathError::InvalidInput(
            "Autocorrelation window must be greater than zero".to_string(),
        ));
    }
    ensure_finite(data, "autocorrelation input")?;

    let start = data.len().saturating_sub(window);
    let series = &data[start..];
    let n = series.len();
    if n < 2 {
        return Err(MathError::InsufficientData(format!(
            "Need at least 2 observations for autocorrelation, have {}",
            n
        )));
    }

    let m = mean(series).unwrap_or(0.0);
    let centred: Vec<f64> = series.iter().map(|x| x - m).collect();
    let denom = centred.iter().map(|x| x * x).sum::<f64>();
    if denom == 0.0 {
        return Err(MathError::CalculationError(
            "Series is constant over the window".to_string(),
        ));
    }

    let acf = (0..n)
        .map(|lag| {
            let sum = centred[lag..]
                .iter()
                .zip(centred.iter())
                .map(|(a, b)| a * b)
                .sum::<f64>();
            sum / denom
        })
        .collect();
    Ok(acf)
}

/// The lag in `[-max_lag, max_lag]` with the largest absolute cross-correlation
///
/// At lag `l`, `r(l) = sum((x[t+l] - mean_x) * (y[t] - mean_y)) / (n * sd_x * sd_y)`
/// with population standard deviations; positive lags mean `x` trails `y`.
/// Returns `(best_lag, correlation_at_best_lag)`. Ties keep the most negative
/// lag. Lags that would not overlap at all are never considered.
pub fn best_lag(x: &[f64], y: &[f64], max_lag: usize) -> Result<(i64, f64)> {
    let stats = PairStats::new(x, y)?;
    let reach = max_lag.min(x.len() - 1) as i64;

    let mut best: Option<(i64, f64)> = None;
    for lag in -reach..=reach {
        let r = stats.at(x, y, lag);
        match best {
            Some((_, current)) if r.abs() <= current.abs() => {}
            _ => best = Some((lag, r)),
        }
    }

    best.ok_or_else(|| MathError::CalculationError("No lag evaluated".to_string()))
}

struct PairStats {
    mean_x: f64,
    mean_y: f64,
    scale: f64,
}

impl PairStats {
    fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() {
            return Err(MathError::InvalidInput(format!(
                "Series lengths differ: {} vs {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(MathError::InsufficientData(
                "Need at least 2 observations for cross-correlation".to_string(),
            ));
        }
        ensure_finite(x, "first series")?;
        ensure_finite(y, "second series")?;

        let sd_x = std_dev(x, 0).unwrap_or(0.0);
        let sd_y = std_dev(y, 0).unwrap_or(0.0);
        if sd_x == 0.0 || sd_y == 0.0 {
            return Err(MathError::CalculationError(
                "Cannot correlate a constant series".to_string(),
            ));
        }

        Ok(Self {
            mean_x: mean(x).unwrap_or(0.0),
            mean_y: mean(y).unwrap_or(0.0),
            scale: x.len() as f64 * sd_x * sd_y,
        })
    }

    fn at(&self, x: &[f64], y: &[f64], lag: i64) -> f64 {
        let n = x.len() as i64;
        let sum = (0..n)
            .filter_map(|t| {
                let shifted = t + lag;
                if shifted < 0 || shifted >= n {
                    return None;
                }
                Some((x[shifted as usize] - self.mean_x) * (y[t as usize] - self.mean_y))
            })
            .sum::<f64>();
        sum / self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_autocorrelation_lag_zero_is_one() {
        let data: Vec<f64> = (0..50).map(|i| ((i as f64) * 0.4).sin() + i as f64 * 0.01).collect();
        let acf = autocorrelation(&data, 30).unwrap();
        assert_eq!(acf.len(), 30);
        assert_relative_eq!(acf[0], 1.0, epsilon = 1e-12);
        assert!(acf.iter().all(|r| r.abs() <= 1.0 + 1e-12));
    }

    #[test]
    fn test_autocorrelation_short_series_uses_all() {
        let acf = autocorrelation(&[1.0, 3.0, 2.0, 5.0], 30).unwrap();
        assert_eq!(acf.len(), 4);
    }

    #[test]
    fn test_autocorrelation_constant_fails() {
        assert!(matches!(
            autocorrelation(&[2.0; 10], 5),
            Err(MathError::CalculationError(_))
        ));
        assert!(autocorrelation(&[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn test_cross_correlation_identical_series() {
        let x: Vec<f64> = (0..40).map(|i| ((i as f64) * 0.3).cos()).collect();
        let (lag, r) = best_lag(&x, &x, 5).unwrap();
        assert_eq!(lag, 0);
        assert_relative_eq!(r, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_best_lag_detects_shift() {
        let y: Vec<f64> = (0..60).map(|i| if i == 30 { 10.0 } else { 0.0 }).collect();
        let x: Vec<f64> = (0..60).map(|i| if i == 33 { 10.0 } else { 0.0 }).collect();
        let (lag, r) = best_lag(&x, &y, 10).unwrap();
        assert_eq!(lag, 3);
        assert!(r > 0.9);
    }

    #[test]
    fn test_best_lag_stays_in_range() {
        let x = [1.0, 0.0, 2.0];
        let y = [0.0, 1.0, 0.0];
        let (lag, _) = best_lag(&x, &y, 10).unwrap();
        assert!(lag.abs() <= 2);
    }

    #[test]
    fn test_cross_correlation_rejects_constant() {
        assert!(best_lag(&[1.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0], 2).is_err());
        assert!(best_lag(&[1.0, 2.0], &[1.0], 1).is_err());
    }
}
