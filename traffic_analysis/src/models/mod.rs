//! Forecasting models for daily traffic series
//!
//! A model is configured first and trained on a series second, so one
//! configuration can be fitted to many page columns.

use crate::error::{AnalysisError, Result};
use std::fmt::Debug;

/// Point forecasts for consecutive days with their confidence bounds
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    values: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl ForecastResult {
    /// Point forecasts with one `(lower, upper)` pair per day
    pub fn with_bounds(values: Vec<f64>, bounds: Vec<(f64, f64)>) -> Result<Self> {
        if values.len() != bounds.len() {
            return Err(AnalysisError::InvalidParameter(format!(
                "{} forecast values but {} confidence bounds",
                values.len(),
                bounds.len()
            )));
        }
        Ok(Self { values, bounds })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Days covered
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(lower, upper)` per day
    pub fn intervals(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

/// A model fitted to one series
pub trait TrainedForecastModel: Debug {
    /// Forecast `horizon` days past the end of the training series
    fn forecast(&self, horizon: usize) -> Result<ForecastResult>;

    /// Fold a newly observed value into the model state without refitting
    fn update(&mut self, observation: f64) -> Result<()>;

    fn name(&self) -> &str;
}

/// Model configuration that can be fitted to a daily series
pub trait ForecastModel: Debug + Clone {
    type Trained: TrainedForecastModel;

    fn train(&self, data: &[f64]) -> Result<Self::Trained>;

    fn name(&self) -> &str;
}

pub mod arima;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_must_match_values() {
        assert!(ForecastResult::with_bounds(vec![1.0, 2.0], vec![(0.0, 2.0)]).is_err());

        let result = ForecastResult::with_bounds(vec![1.0], vec![(0.5, 1.5)]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.intervals(), &[(0.5, 1.5)][..]);
    }
}
