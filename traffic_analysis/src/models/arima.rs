//! ARIMA models for daily traffic forecasting
//!
//! Coefficients are estimated with the Hannan-Rissanen two-stage regression:
//! a long autoregression supplies innovation estimates, then the series is
//! regressed on its own lags and the lagged innovations. Fit statistics come
//! from the conditional sum of squares of the one-step residuals.

use crate::error::{AnalysisError, Result};
use crate::models::{ForecastModel, ForecastResult, TrainedForecastModel};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::fmt;
use tracing::debug;
use trend_math::linalg::least_squares;
use trend_math::MathError;

/// Coverage of the forecast intervals
const CONFIDENCE_LEVEL: f64 = 0.95;

/// ARIMA order (p, d, q)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArimaOrder {
    /// AR order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// MA order
    pub q: usize,
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }
}

impl fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.p, self.d, self.q)
    }
}

/// Goodness-of-fit summary of a trained model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    /// Akaike Information Criterion
    pub aic: f64,
    /// Bayesian Information Criterion
    pub bic: f64,
    /// Gaussian log-likelihood
    pub log_likelihood: f64,
    /// Residual variance
    pub sigma2: f64,
    /// Observations the likelihood was evaluated on
    pub nobs: usize,
}

/// ARIMA model (AutoRegressive Integrated Moving Average)
#[derive(Debug, Clone)]
pub struct ArimaModel {
    /// Name of the model
    name: String,
    /// Model order
    order: ArimaOrder,
}

/// Trained ARIMA model
#[derive(Debug, Clone)]
pub struct TrainedArimaModel {
    /// Name of the model
    name: String,
    /// Model order
    order: ArimaOrder,
    /// Mean removed from the differenced series (zero when d > 0)
    mean: f64,
    /// Fitted AR coefficients
    ar_coefficients: Vec<f64>,
    /// Fitted MA coefficients
    ma_coefficients: Vec<f64>,
    /// Observations on the original scale
    history: Vec<f64>,
    /// Differenced, mean-removed observations
    centred: Vec<f64>,
    /// One-step residuals aligned with `centred`
    residuals: Vec<f64>,
    /// Fit statistics
    statistics: FitStatistics,
}

impl ArimaModel {
    /// Create a new ARIMA model
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self::with_order(ArimaOrder::new(p, d, q))
    }

    /// Create a new ARIMA model from an order
    pub fn with_order(order: ArimaOrder) -> Self {
        Self {
            name: format!("ARIMA{}", order),
            order,
        }
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    /// Shortest series this order can be fitted on
    pub fn min_observations(&self) -> usize {
        self.order.d + 2 * (self.order.p + self.order.q) + 10
    }
}

impl ForecastModel for ArimaModel {
    type Trained = TrainedArimaModel;

    fn train(&self, data: &[f64]) -> Result<TrainedArimaModel> {
        let ArimaOrder { p, d, q } = self.order;

        if data.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::compute(&self.name, "series contains NaN or infinite values"));
        }
        if data.len() < self.min_observations() {
            return Err(MathError::InsufficientData(format!(
                "{} needs at least {} observations, have {}",
                self.name,
                self.min_observations(),
                data.len()
            ))
            .into());
        }

        // Difference, then centre when no differencing is applied
        let differenced = difference(data, d);
        let mean = if d == 0 {
            trend_math::mean(&differenced).unwrap_or(0.0)
        } else {
            0.0
        };
        let centred: Vec<f64> = differenced.iter().map(|v| v - mean).collect();
        if !(trend_math::variance(&centred, 0).unwrap_or(0.0) > 1e-12) {
            return Err(AnalysisError::compute(&self.name, "series has no variance after differencing"));
        }

        let (ar_coefficients, ma_coefficients) = hannan_rissanen(&centred, p, q)?;
        if !is_stationary(&ar_coefficients) {
            return Err(AnalysisError::compute(&self.name, "AR part is not stationary"));
        }
        if !is_invertible(&ma_coefficients) {
            return Err(AnalysisError::compute(&self.name, "MA part is not invertible"));
        }

        let residuals = css_residuals(&centred, &ar_coefficients, &ma_coefficients);
        let statistics = fit_statistics(&residuals[p..], self.order)
            .ok_or_else(|| AnalysisError::compute(&self.name, "degenerate residual variance"))?;

        debug!(model = %self.name, aic = statistics.aic, "ARIMA fitted");

        Ok(TrainedArimaModel {
            name: self.name.clone(),
            order: self.order,
            mean,
            ar_coefficients,
            ma_coefficients,
            history: data.to_vec(),
            centred,
            residuals,
            statistics,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TrainedForecastModel for TrainedArimaModel {
    fn forecast(&self, horizon: usize) -> Result<ForecastResult> {
        if horizon == 0 {
            return Err(AnalysisError::InvalidParameter(
                "Forecast horizon must be greater than zero".to_string(),
            ));
        }

        // Future innovations are zero in expectation
        let mut x = self.centred.clone();
        let mut e = self.residuals.clone();
        let mut differenced = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let next = one_step(&x, &e, &self.ar_coefficients, &self.ma_coefficients);
            x.push(next);
            e.push(0.0);
            differenced.push(next + self.mean);
        }
        let values = integrate(&self.history, self.order.d, &differenced);

        // Interval half-width grows with the cumulative psi weights
        let z = Normal::new(0.0, 1.0)
            .map_err(|e| AnalysisError::compute(&self.name, e))?
            .inverse_cdf(0.5 + CONFIDENCE_LEVEL / 2.0);
        let mut cumulative = 0.0;
        let intervals = values
            .iter()
            .zip(self.psi_weights(horizon))
            .map(|(value, psi)| {
                cumulative += psi * psi;
                let half_width = z * (self.statistics.sigma2 * cumulative).sqrt();
                (value - half_width, value + half_width)
            })
            .collect();

        ForecastResult::with_bounds(values, intervals)
    }

    fn update(&mut self, observation: f64) -> Result<()> {
        if !observation.is_finite() {
            return Err(AnalysisError::InvalidParameter(
                "Observation must be finite".to_string(),
            ));
        }

        let predicted = one_step(
            &self.centred,
            &self.residuals,
            &self.ar_coefficients,
            &self.ma_coefficients,
        );

        self.history.push(observation);
        let d = self.order.d;
        let tail = &self.history[self.history.len() - (d + 1)..];
        let newest = difference(tail, d).first().copied().unwrap_or(observation) - self.mean;

        self.centred.push(newest);
        self.residuals.push(newest - predicted);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TrainedArimaModel {
    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn statistics(&self) -> &FitStatistics {
        &self.statistics
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.ar_coefficients
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.ma_coefficients
    }

    /// Observations seen so far, including any folded in by `update`
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// MA(infinity) weights of the integrated process
    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        // Expand (1 - sum phi_i B^i)(1 - B)^d
        let mut poly = vec![1.0];
        poly.extend(self.ar_coefficients.iter().map(|phi| -phi));
        for _ in 0..self.order.d {
            let mut next = vec![0.0; poly.len() + 1];
            for (i, c) in poly.iter().enumerate() {
                next[i] += c;
                next[i + 1] -= c;
            }
            poly = next;
        }
        let phi_star: Vec<f64> = poly[1..].iter().map(|c| -c).collect();

        let mut psi = vec![1.0];
        for j in 1..horizon {
            let mut weight = self.ma_coefficients.get(j - 1).copied().unwrap_or(0.0);
            for i in 1..=phi_star.len().min(j) {
                weight += phi_star[i - 1] * psi[j - i];
            }
            psi.push(weight);
        }
        psi
    }
}

/// Chooses an ARIMA order for a series
pub trait OrderSelector {
    /// Best order for `series`, `None` when no candidate can be fitted
    fn best_order(&self, series: &[f64]) -> Option<ArimaOrder>;
}

/// Exhaustive search over small orders minimising AIC
#[derive(Debug, Clone, Copy)]
pub struct AicGridSearch {
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
}

impl Default for AicGridSearch {
    fn default() -> Self {
        Self {
            max_p: 2,
            max_d: 2,
            max_q: 2,
        }
    }
}

impl OrderSelector for AicGridSearch {
    fn best_order(&self, series: &[f64]) -> Option<ArimaOrder> {
        let mut best: Option<(ArimaOrder, f64)> = None;

        for p in 0..=self.max_p {
            for d in 0..=self.max_d {
                for q in 0..=self.max_q {
                    let order = ArimaOrder::new(p, d, q);
                    match ArimaModel::with_order(order).train(series) {
                        Ok(model) => {
                            let aic = model.statistics().aic;
                            if aic.is_finite() && best.map_or(true, |(_, current)| aic < current) {
                                best = Some((order, aic));
                            }
                        }
                        Err(e) => debug!(%order, "Skipping candidate order: {}", e),
                    }
                }
            }
        }

        best.map(|(order, _)| order)
    }
}

/// Apply `d` rounds of first differencing
pub fn difference(data: &[f64], d: usize) -> Vec<f64> {
    let mut current = data.to_vec();
    for _ in 0..d {
        current = current.windows(2).map(|w| w[1] - w[0]).collect();
    }
    current
}

/// Undo `d` rounds of differencing for forecasts that follow `history`
fn integrate(history: &[f64], d: usize, forecasts: &[f64]) -> Vec<f64> {
    // levels[k] is the k-th difference of the history
    let mut levels = vec![history.to_vec()];
    for k in 1..d {
        let next = difference(&levels[k - 1], 1);
        levels.push(next);
    }

    let mut current = forecasts.to_vec();
    for level in levels.iter().take(d).rev() {
        let mut last = level.last().copied().unwrap_or(0.0);
        current = current
            .iter()
            .map(|v| {
                last += v;
                last
            })
            .collect();
    }
    current
}

/// Prediction of the next value from the past values and innovations
fn one_step(x: &[f64], e: &[f64], ar: &[f64], ma: &[f64]) -> f64 {
    let t = x.len();
    let ar_part: f64 = ar
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < t)
        .map(|(i, phi)| phi * x[t - 1 - i])
        .sum();
    let ma_part: f64 = ma
        .iter()
        .enumerate()
        .filter(|(j, _)| *j < e.len())
        .map(|(j, theta)| theta * e[e.len() - 1 - j])
        .sum();
    ar_part + ma_part
}

/// Conditional one-step residuals; the first `p` are fixed at zero
fn css_residuals(x: &[f64], ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let mut e = vec![0.0; x.len()];
    for t in ar.len()..x.len() {
        e[t] = x[t] - one_step(&x[..t], &e[..t], ar, ma);
    }
    e
}

fn fit_statistics(residuals: &[f64], order: ArimaOrder) -> Option<FitStatistics> {
    let nobs = residuals.len();
    if nobs == 0 {
        return None;
    }
    let n = nobs as f64;
    let sigma2 = residuals.iter().map(|e| e * e).sum::<f64>() / n;
    if !sigma2.is_finite() || sigma2 <= 1e-12 {
        return None;
    }

    let log_likelihood = -0.5 * n * ((2.0 * PI * sigma2).ln() + 1.0);
    // AR + MA coefficients, the variance, and the mean when not differenced
    let k = (order.p + order.q + 1 + usize::from(order.d == 0)) as f64;

    Some(FitStatistics {
        aic: -2.0 * log_likelihood + 2.0 * k,
        bic: -2.0 * log_likelihood + k * n.ln(),
        log_likelihood,
        sigma2,
        nobs,
    })
}

fn hannan_rissanen(x: &[f64], p: usize, q: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    if p == 0 && q == 0 {
        return Ok((Vec::new(), Vec::new()));
    }
    let n = x.len();

    // Stage 1: long autoregression to estimate innovations
    let long_order = if q == 0 {
        0
    } else {
        (p + q + 1).max((n / 4).min(12))
    };
    let mut innovations = vec![0.0; n];
    if q > 0 {
        let rows: Vec<Vec<f64>> = (long_order..n)
            .map(|t| (1..=long_order).map(|i| x[t - i]).collect())
            .collect();
        let phi = least_squares(&rows, &x[long_order..])?;
        for t in long_order..n {
            let fitted: f64 = (1..=long_order).map(|i| phi[i - 1] * x[t - i]).sum();
            innovations[t] = x[t] - fitted;
        }
    }

    // Stage 2: regress on own lags and lagged innovations
    let start = p.max(long_order + q);
    if n < start + 2 * (p + q) + 2 {
        return Err(MathError::InsufficientData(format!(
            "Not enough observations to estimate {} coefficients",
            p + q
        ))
        .into());
    }
    let rows: Vec<Vec<f64>> = (start..n)
        .map(|t| {
            (1..=p)
                .map(|i| x[t - i])
                .chain((1..=q).map(|j| innovations[t - j]))
                .collect()
        })
        .collect();
    let beta = least_squares(&rows, &x[start..])?;

    Ok((beta[..p].to_vec(), beta[p..].to_vec()))
}

/// True when `1 - sum a_i z^i` has every root outside the unit circle
///
/// Runs the Levinson recursion backwards; every reflection coefficient
/// must lie strictly inside (-1, 1).
fn is_stable(coefficients: &[f64]) -> bool {
    let mut a = coefficients.to_vec();
    while let Some(&r) = a.last() {
        if !r.is_finite() || r.abs() >= 1.0 {
            return false;
        }
        let k = a.len() - 1;
        let denom = 1.0 - r * r;
        a = (0..k).map(|j| (a[j] + r * a[k - 1 - j]) / denom).collect();
    }
    true
}

fn is_stationary(ar: &[f64]) -> bool {
    is_stable(ar)
}

fn is_invertible(ma: &[f64]) -> bool {
    let negated: Vec<f64> = ma.iter().map(|theta| -theta).collect();
    is_stable(&negated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ar1_series(phi: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = 0.0;
        (0..n)
            .map(|_| {
                x = phi * x + rng.gen_range(-1.0..1.0);
                50.0 + x
            })
            .collect()
    }

    fn random_walk(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut level = 100.0;
        (0..n)
            .map(|_| {
                level += rng.gen_range(-2.0..2.0);
                level
            })
            .collect()
    }

    #[test]
    fn test_difference_and_integrate() {
        let data = [1.0, 4.0, 9.0, 16.0, 25.0];
        assert_eq!(difference(&data, 1), vec![3.0, 5.0, 7.0, 9.0]);
        assert_eq!(difference(&data, 2), vec![2.0, 2.0, 2.0]);
        assert_eq!(integrate(&data, 2, &[2.0, 2.0]), vec![36.0, 49.0]);
        assert_eq!(integrate(&data, 0, &[3.0]), vec![3.0]);
    }

    #[test]
    fn test_stability_checks() {
        assert!(is_stationary(&[]));
        assert!(is_stationary(&[0.5]));
        assert!(!is_stationary(&[1.2]));
        assert!(is_stationary(&[0.5, 0.3]));
        // phi1 + phi2 >= 1 has a unit root
        assert!(!is_stationary(&[0.7, 0.4]));
        assert!(is_invertible(&[0.4]));
        assert!(!is_invertible(&[-1.5]));
    }

    #[test]
    fn test_ar1_coefficient_recovered() {
        let data = ar1_series(0.6, 400, 7);
        let model = ArimaModel::new(1, 0, 0).train(&data).unwrap();
        assert!((model.ar_coefficients()[0] - 0.6).abs() < 0.15);
        assert!(model.statistics().aic.is_finite());
        assert_eq!(model.statistics().nobs, 399);
    }

    #[test]
    fn test_forecast_intervals_widen() {
        let data = random_walk(120, 11);
        let model = ArimaModel::new(1, 1, 1).train(&data).unwrap();
        let forecast = model.forecast(7).unwrap();

        assert_eq!(forecast.len(), 7);
        let intervals = forecast.intervals();
        let widths: Vec<f64> = intervals.iter().map(|(lo, hi)| hi - lo).collect();
        assert!(widths.windows(2).all(|w| w[1] >= w[0] - 1e-9));
        for (value, (lo, hi)) in forecast.values().iter().zip(intervals) {
            assert!(lo < value && value < hi);
        }
    }

    #[test]
    fn test_white_noise_mean_forecast() {
        let data = ar1_series(0.0, 200, 3);
        let model = ArimaModel::new(0, 0, 0).train(&data).unwrap();
        let forecast = model.forecast(3).unwrap();
        let mean = trend_math::mean(&data).unwrap();
        for value in forecast.values() {
            assert_relative_eq!(*value, mean, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_update_extends_state() {
        let data = ar1_series(0.5, 100, 5);
        let mut model = ArimaModel::new(1, 1, 0).train(&data).unwrap();
        let before = model.forecast(1).unwrap().values()[0];

        model.update(data[99] + 10.0).unwrap();
        assert_eq!(model.history().len(), 101);
        let after = model.forecast(1).unwrap().values()[0];
        assert!(after > before);
        assert!(model.update(f64::NAN).is_err());
    }

    #[test]
    fn test_short_or_constant_series_rejected() {
        assert!(ArimaModel::new(2, 1, 2).train(&[1.0, 2.0, 3.0]).is_err());
        assert!(ArimaModel::new(0, 0, 0).train(&[5.0; 40]).is_err());
    }

    #[test]
    fn test_grid_search_selects_order() {
        let data = ar1_series(0.7, 150, 13);
        let order = AicGridSearch::default().best_order(&data).unwrap();
        assert!(order.p <= 2 && order.d <= 2 && order.q <= 2);
        assert!(AicGridSearch::default().best_order(&[3.0; 50]).is_none());
    }
}
