//! Series splitting, forecast calendars and one-step error metrics

use crate::error::{AnalysisError, Result};
use chrono::{Duration, NaiveDate};

/// Chronological split; the training part takes `floor(len * train_ratio)` values
///
/// A ratio outside `(0, 1)` puts everything in the training part.
pub fn train_test_split(data: &[f64], train_ratio: f64) -> (Vec<f64>, Vec<f64>) {
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return (data.to_vec(), Vec::new());
    }
    let (train, test) = data.split_at((data.len() as f64 * train_ratio) as usize);
    (train.to_vec(), test.to_vec())
}

/// Daily dates following `last`
pub fn future_dates(last: NaiveDate, horizon: usize) -> Vec<NaiveDate> {
    (1..=horizon as i64).map(|i| last + Duration::days(i)).collect()
}

/// Summary of forecast errors against held-out traffic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Percentage error over days with non-zero traffic, `None` when every day is zero
    pub mape: Option<f64>,
}

/// Compare forecasts with the traffic that was actually observed
pub fn error_metrics(forecast: &[f64], actual: &[f64]) -> Result<ErrorMetrics> {
    if forecast.len() != actual.len() || forecast.is_empty() {
        return Err(AnalysisError::InvalidParameter(format!(
            "Cannot score {} forecasts against {} observations",
            forecast.len(),
            actual.len()
        )));
    }

    let errors: Vec<f64> = actual.iter().zip(forecast).map(|(a, f)| a - f).collect();
    let n = errors.len() as f64;
    let percentages: Vec<f64> = actual
        .iter()
        .zip(&errors)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, e)| 100.0 * e.abs() / a.abs())
        .collect();

    Ok(ErrorMetrics {
        mae: errors.iter().map(|e| e.abs()).sum::<f64>() / n,
        rmse: root_mean_square(&errors).unwrap_or(0.0),
        mape: trend_math::mean(&percentages),
    })
}

/// Mean absolute error after each day, the figure logged next to every rolling step
pub fn running_mae(abs_errors: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    abs_errors
        .iter()
        .enumerate()
        .map(|(i, e)| {
            total += e;
            total / (i + 1) as f64
        })
        .collect()
}

/// `sqrt(mean(e²))`, `None` for no errors
pub fn root_mean_square(errors: &[f64]) -> Option<f64> {
    let squared: Vec<f64> = errors.iter().map(|e| e * e).collect();
    trend_math::mean(&squared).map(f64::sqrt)
}
