//! ARIMA forecasting engine
//!
//! Two modes share one engine:
//!
//! - **Plain**: pick an order on the full history, forecast `steps` days
//!   ahead with confidence bounds.
//! - **Rolling**: split each column chronologically, fit once on the
//!   training part, then forecast one step at a time across the test part,
//!   folding every actual value into the model before the next step.
//!
//! Order search is the expensive part of the whole pipeline, so a unit
//! whose figure and CSV rows are still valid is never refitted.

use crate::cache::{read_records, write_records, Deadline, FigureStore, KeyedLocks};
use crate::error::{AnalysisError, Result};
use crate::models::arima::{AicGridSearch, ArimaModel, ArimaOrder, OrderSelector};
use crate::models::{ForecastModel, TrainedForecastModel};
use crate::plot::{FigureRenderer, ForecastPoint};
use crate::utils::{error_metrics, future_dates, running_mae, train_test_split, ErrorMetrics};
use crate::{group_by_subject, Grouped, SubjectGroups};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use trend_math::fill::{first_present, trim_and_fill};
use wiki_traffic::{PageKey, TrafficTable};

/// Default share of each column used for training in rolling mode
pub const DEFAULT_TRAIN_RATIO: f64 = 0.7;

/// Which forecast to run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ForecastMode {
    /// Forecast `steps` days past the end of the table
    Plain { steps: usize },
    /// One-step-ahead evaluation over the held-out tail
    Rolling { train_ratio: f64 },
}

/// Results of either forecast mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "results", rename_all = "snake_case")]
pub enum ForecastOutcome {
    Plain(SubjectGroups<PlainForecast>),
    Rolling(SubjectGroups<RollingForecast>),
}

/// One forecast day with its confidence bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Plain forecast of one page column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainForecast {
    pub subject: String,
    pub language: String,
    /// Fitted order, `None` when reloaded from the cache
    pub order: Option<ArimaOrder>,
    pub rows: Vec<ForecastRow>,
    pub filename: String,
}

impl Grouped for PlainForecast {
    fn subject(&self) -> &str {
        &self.subject
    }
}

/// One step of a rolling evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingStep {
    pub date: NaiveDate,
    pub forecast: f64,
    pub actual: f64,
    /// Absolute error of this step
    pub error: f64,
    /// Mean absolute error up to and including this step
    pub mae: f64,
}

/// Rolling evaluation of one page column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingForecast {
    pub subject: String,
    pub language: String,
    /// Fitted order, `None` when reloaded from the cache
    pub order: Option<ArimaOrder>,
    pub steps: Vec<RollingStep>,
    pub rmse: f64,
    /// Mean absolute percentage error over days with traffic
    pub mape: Option<f64>,
    pub filename: String,
}

impl Grouped for RollingForecast {
    fn subject(&self) -> &str {
        &self.subject
    }
}

/// One row of `arima_results.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArimaRecord {
    #[serde(rename = "Column")]
    column: String,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Mean")]
    mean: f64,
    #[serde(rename = "Mean_CI_Lower")]
    lower: f64,
    #[serde(rename = "Mean_CI_Upper")]
    upper: f64,
}

/// One row of `arima_rolling_results.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RollingRecord {
    #[serde(rename = "Subject")]
    subject: String,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Forecast")]
    forecast: f64,
    #[serde(rename = "Actual")]
    actual: f64,
    #[serde(rename = "Error")]
    error: f64,
    #[serde(rename = "MAE")]
    mae: f64,
}

pub fn arima_figure_name(key: &PageKey) -> String {
    format!("arima_{}.svg", key.file_stem())
}

pub fn rolling_figure_name(key: &PageKey) -> String {
    format!("arima_rolling_{}.svg", key.file_stem())
}

/// Pair forecasts with the actuals they predicted, dropping any unmatched tail
pub fn align_rolling(forecasts: &[f64], actuals: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = forecasts.len().min(actuals.len());
    if forecasts.len() != actuals.len() {
        warn!(
            forecasts = forecasts.len(),
            actuals = actuals.len(),
            "Rolling forecast length mismatch, truncating"
        );
    }
    (forecasts[..n].to_vec(), actuals[..n].to_vec())
}

/// Result files and figure directories of both modes
#[derive(Debug, Clone)]
pub struct ForecastPaths {
    pub plain_figures: PathBuf,
    pub plain_results: PathBuf,
    pub rolling_figures: PathBuf,
    pub rolling_results: PathBuf,
}

impl ForecastPaths {
    /// Standard layout under a figures root and a data directory
    pub fn standard<P: AsRef<Path>, Q: AsRef<Path>>(figures_root: P, data_dir: Q) -> Self {
        let figures_root = figures_root.as_ref();
        let data_dir = data_dir.as_ref();
        Self {
            plain_figures: figures_root.join("arima_figures"),
            plain_results: data_dir.join("arima_results.csv"),
            rolling_figures: figures_root.join("arima_rolling_figures"),
            rolling_results: data_dir.join("arima_rolling_results.csv"),
        }
    }
}

/// ARIMA forecasting with order selection and result caching
pub struct ForecastEngine<S = AicGridSearch> {
    selector: S,
    plain_figures: FigureStore,
    plain_results: PathBuf,
    rolling_figures: FigureStore,
    rolling_results: PathBuf,
    renderer: FigureRenderer,
    locks: KeyedLocks,
}

impl ForecastEngine<AicGridSearch> {
    /// Create a new engine using the AIC grid search over orders up to (2, 2, 2)
    pub fn new(paths: ForecastPaths) -> Self {
        Self::with_selector(AicGridSearch::default(), paths)
    }
}

impl<S: OrderSelector> ForecastEngine<S> {
    /// Create a new engine with a custom order selector
    pub fn with_selector(selector: S, paths: ForecastPaths) -> Self {
        Self {
            selector,
            plain_figures: FigureStore::new(paths.plain_figures),
            plain_results: paths.plain_results,
            rolling_figures: FigureStore::new(paths.rolling_figures),
            rolling_results: paths.rolling_results,
            renderer: FigureRenderer::default(),
            locks: KeyedLocks::new(),
        }
    }

    /// Figure directories of both modes
    pub fn figure_stores(&self) -> [&FigureStore; 2] {
        [&self.plain_figures, &self.rolling_figures]
    }

    /// Result files of both modes
    pub fn results_paths(&self) -> [&Path; 2] {
        [self.plain_results.as_path(), self.rolling_results.as_path()]
    }

    /// Run the requested mode
    pub fn run(
        &self,
        table: &TrafficTable,
        mode: ForecastMode,
        deadline: &Deadline,
    ) -> Result<ForecastOutcome> {
        match mode {
            ForecastMode::Plain { steps } => {
                self.forecast(table, steps, deadline).map(ForecastOutcome::Plain)
            }
            ForecastMode::Rolling { train_ratio } => self
                .rolling(table, train_ratio, deadline)
                .map(ForecastOutcome::Rolling),
        }
    }

    /// Forecast `steps` days past the end of every column
    pub fn forecast(
        &self,
        table: &TrafficTable,
        steps: usize,
        deadline: &Deadline,
    ) -> Result<SubjectGroups<PlainForecast>> {
        if steps == 0 {
            return Err(AnalysisError::InvalidParameter(
                "Forecast steps must be greater than zero".to_string(),
            ));
        }
        if table.is_empty() {
            info!("Traffic table is empty, skipping forecast");
            return Ok(SubjectGroups::new());
        }
        info!(columns = table.width(), steps, "Running ARIMA forecast");
        self.plain_figures.ensure()?;

        let mut cached = self.load_plain_cache(steps);
        let mut results = Vec::new();
        let mut recomputed = false;

        for (key, values) in table.columns() {
            if deadline.expired() {
                warn!("Deadline reached, returning partial forecasts");
                break;
            }
            if let Some(hit) = cached.remove(key) {
                debug!(column = %key, "Using cached forecast");
                results.push(hit);
                continue;
            }

            let lock_key = format!("arima_{}", key.column_name());
            let outcome = self.locks.with_lock(&lock_key, || {
                self.forecast_column(key, table.dates(), values, steps)
            });
            match outcome {
                Ok(result) => {
                    recomputed = true;
                    results.push(result);
                }
                Err(e @ AnalysisError::PersistenceFailure { .. }) => return Err(e),
                Err(e) => warn!(column = %key, "Forecast failed: {}", e),
            }
        }

        if recomputed {
            let records: Vec<ArimaRecord> = results
                .iter()
                .flat_map(|r| {
                    let column = PageKey::new(r.language.clone(), r.subject.clone()).column_name();
                    r.rows.iter().map(move |row| ArimaRecord {
                        column: column.clone(),
                        date: row.date,
                        mean: row.mean,
                        lower: row.lower,
                        upper: row.upper,
                    })
                })
                .collect();
            write_records(&self.plain_results, &records)?;
        }
        Ok(group_by_subject(results))
    }

    /// One-step-ahead evaluation over the last `1 - train_ratio` of every column
    pub fn rolling(
        &self,
        table: &TrafficTable,
        train_ratio: f64,
        deadline: &Deadline,
    ) -> Result<SubjectGroups<RollingForecast>> {
        if train_ratio <= 0.0 || train_ratio >= 1.0 {
            return Err(AnalysisError::InvalidParameter(
                "Train ratio must be between 0 and 1".to_string(),
            ));
        }
        if table.is_empty() {
            info!("Traffic table is empty, skipping rolling forecast");
            return Ok(SubjectGroups::new());
        }
        info!(columns = table.width(), train_ratio, "Running rolling ARIMA forecast");
        self.rolling_figures.ensure()?;

        let mut cached = self.load_rolling_cache();
        let mut results = Vec::new();
        let mut recomputed = false;

        for (key, values) in table.columns() {
            if deadline.expired() {
                warn!("Deadline reached, returning partial rolling forecasts");
                break;
            }
            if let Some(hit) = cached.remove(key) {
                if hit.steps.len() == expected_test_len(values, train_ratio) {
                    debug!(column = %key, "Using cached rolling forecast");
                    results.push(hit);
                    continue;
                }
            }

            let lock_key = format!("arima_rolling_{}", key.column_name());
            let outcome = self.locks.with_lock(&lock_key, || {
                self.rolling_column(key, table.dates(), values, train_ratio)
            });
            match outcome {
                Ok(result) => {
                    recomputed = true;
                    results.push(result);
                }
                Err(e @ AnalysisError::PersistenceFailure { .. }) => return Err(e),
                Err(e) => warn!(column = %key, "Rolling forecast failed: {}", e),
            }
        }

        if recomputed {
            let records: Vec<RollingRecord> = results
                .iter()
                .flat_map(|r| {
                    let column = PageKey::new(r.language.clone(), r.subject.clone()).column_name();
                    r.steps.iter().map(move |step| RollingRecord {
                        subject: column.clone(),
                        date: step.date,
                        forecast: step.forecast,
                        actual: step.actual,
                        error: step.error,
                        mae: step.mae,
                    })
                })
                .collect();
            write_records(&self.rolling_results, &records)?;
        }
        Ok(group_by_subject(results))
    }

    fn select_order(&self, key: &PageKey, series: &[f64]) -> Result<ArimaOrder> {
        let order = self.selector.best_order(series).ok_or_else(|| {
            AnalysisError::compute(key.column_name(), "no candidate order could be fitted")
        })?;
        info!(column = %key, %order, "Selected ARIMA order");
        Ok(order)
    }

    fn forecast_column(
        &self,
        key: &PageKey,
        dates: &[NaiveDate],
        values: &[Option<f64>],
        steps: usize,
    ) -> Result<PlainForecast> {
        let (start, series) = trim_and_fill(values)
            .ok_or_else(|| AnalysisError::compute(key.column_name(), "column has no values"))?;
        let order = self.select_order(key, &series)?;
        let model = ArimaModel::with_order(order).train(&series)?;
        let forecast = model.forecast(steps)?;

        let last = dates
            .last()
            .copied()
            .ok_or_else(|| AnalysisError::compute(key.column_name(), "table has no dates"))?;
        let intervals = forecast.intervals().iter().copied();
        let rows: Vec<ForecastRow> = future_dates(last, steps)
            .into_iter()
            .zip(forecast.values())
            .zip(intervals)
            .map(|((date, mean), (lower, upper))| ForecastRow {
                date,
                mean: *mean,
                lower,
                upper,
            })
            .collect();

        let filename = arima_figure_name(key);
        if self.plain_figures.contains(&filename) {
            debug!(column = %key, "Forecast figure already present, not redrawn");
        } else {
            let observed: Vec<(NaiveDate, f64)> =
                dates[start..].iter().copied().zip(series.iter().copied()).collect();
            let points: Vec<ForecastPoint> = rows
                .iter()
                .map(|r| (r.date, r.mean, r.lower, r.upper))
                .collect();
            let stats = model.statistics();
            let annotation = format!(
                "ARIMA{}  AIC: {:.2}  BIC: {:.2}  Log-likelihood: {:.2}  Residual variance: {:.2}",
                order, stats.aic, stats.bic, stats.log_likelihood, stats.sigma2
            );
            self.renderer.render_forecast(
                &self.plain_figures.path(&filename),
                &format!("ARIMA forecast for {} ({})", key.subject, key.language),
                &observed,
                &points,
                &annotation,
            )?;
        }

        Ok(PlainForecast {
            subject: key.subject.clone(),
            language: key.language.clone(),
            order: Some(order),
            rows,
            filename,
        })
    }

    fn rolling_column(
        &self,
        key: &PageKey,
        dates: &[NaiveDate],
        values: &[Option<f64>],
        train_ratio: f64,
    ) -> Result<RollingForecast> {
        let (start, series) = trim_and_fill(values)
            .ok_or_else(|| AnalysisError::compute(key.column_name(), "column has no values"))?;
        let (train, test) = train_test_split(&series, train_ratio);
        if test.is_empty() {
            return Err(AnalysisError::compute(key.column_name(), "test split is empty"));
        }

        let order = self.select_order(key, &train)?;
        let mut model = ArimaModel::with_order(order).train(&train)?;
        let fitted = *model.statistics();

        // Forecast one step, then reveal the actual value to the model
        let mut forecasts = Vec::with_capacity(test.len());
        for actual in &test {
            let next = model.forecast(1)?;
            forecasts.push(next.values()[0]);
            model.update(*actual)?;
        }
        let (forecasts, actuals) = align_rolling(&forecasts, &test);
        let metrics = error_metrics(&forecasts, &actuals)?;

        let test_dates = &dates[start + train.len()..];
        let errors: Vec<f64> = forecasts
            .iter()
            .zip(&actuals)
            .map(|(f, a)| (a - f).abs())
            .collect();
        let steps: Vec<RollingStep> = test_dates
            .iter()
            .zip(forecasts.iter().zip(&actuals))
            .zip(errors.iter().zip(running_mae(&errors)))
            .map(|((date, (forecast, actual)), (error, mae))| RollingStep {
                date: *date,
                forecast: *forecast,
                actual: *actual,
                error: *error,
                mae,
            })
            .collect();

        let filename = rolling_figure_name(key);
        let train_points: Vec<(NaiveDate, f64)> = dates[start..]
            .iter()
            .copied()
            .zip(train.iter().copied())
            .collect();
        let test_points: Vec<(NaiveDate, f64)> = steps.iter().map(|s| (s.date, s.actual)).collect();
        let forecast_points: Vec<(NaiveDate, f64)> =
            steps.iter().map(|s| (s.date, s.forecast)).collect();
        self.renderer.render_rolling(
            &self.rolling_figures.path(&filename),
            &format!("Rolling ARIMA forecast for {} ({})", key.subject, key.language),
            &train_points,
            &test_points,
            &forecast_points,
            &rolling_annotation(order, fitted.aic, &metrics),
        )?;

        Ok(RollingForecast {
            subject: key.subject.clone(),
            language: key.language.clone(),
            order: Some(order),
            steps,
            rmse: metrics.rmse,
            mape: metrics.mape,
            filename,
        })
    }

    /// Cached plain forecasts with a figure and exactly `steps` rows
    fn load_plain_cache(&self, steps: usize) -> BTreeMap<PageKey, PlainForecast> {
        let records: Vec<ArimaRecord> = match read_records(&self.plain_results) {
            Ok(Some(records)) => records,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.plain_results.display(), "Ignoring unreadable forecast cache: {}", e);
                return BTreeMap::new();
            }
        };

        let mut by_key: BTreeMap<PageKey, Vec<ForecastRow>> = BTreeMap::new();
        for record in records {
            match record.column.parse::<PageKey>() {
                Ok(key) => by_key.entry(key).or_default().push(ForecastRow {
                    date: record.date,
                    mean: record.mean,
                    lower: record.lower,
                    upper: record.upper,
                }),
                Err(e) => warn!(column = %record.column, "Skipping cached row: {}", e),
            }
        }

        by_key
            .into_iter()
            .filter_map(|(key, rows)| {
                let filename = arima_figure_name(&key);
                if let Err(miss) = self.plain_figures.require(&filename) {
                    debug!(column = %key, "Forecast cache miss: {}", miss);
                    return None;
                }
                if rows.len() != steps {
                    debug!(column = %key, cached = rows.len(), steps, "Forecast cache miss");
                    return None;
                }
                let result = PlainForecast {
                    subject: key.subject.clone(),
                    language: key.language.clone(),
                    order: None,
                    rows,
                    filename,
                };
                Some((key, result))
            })
            .collect()
    }

    /// Cached rolling evaluations that still have their figure
    fn load_rolling_cache(&self) -> BTreeMap<PageKey, RollingForecast> {
        let records: Vec<RollingRecord> = match read_records(&self.rolling_results) {
            Ok(Some(records)) => records,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.rolling_results.display(), "Ignoring unreadable rolling cache: {}", e);
                return BTreeMap::new();
            }
        };

        let mut by_key: BTreeMap<PageKey, Vec<RollingStep>> = BTreeMap::new();
        for record in records {
            match record.subject.parse::<PageKey>() {
                Ok(key) => by_key.entry(key).or_default().push(RollingStep {
                    date: record.date,
                    forecast: record.forecast,
                    actual: record.actual,
                    error: record.error,
                    mae: record.mae,
                }),
                Err(e) => warn!(column = %record.subject, "Skipping cached row: {}", e),
            }
        }

        by_key
            .into_iter()
            .filter_map(|(key, steps)| {
                let filename = rolling_figure_name(&key);
                if let Err(miss) = self.rolling_figures.require(&filename) {
                    debug!(column = %key, "Rolling forecast cache miss: {}", miss);
                    return None;
                }
                let forecasts: Vec<f64> = steps.iter().map(|s| s.forecast).collect();
                let actuals: Vec<f64> = steps.iter().map(|s| s.actual).collect();
                let metrics = error_metrics(&forecasts, &actuals).ok()?;
                let result = RollingForecast {
                    subject: key.subject.clone(),
                    language: key.language.clone(),
                    order: None,
                    steps,
                    rmse: metrics.rmse,
                    mape: metrics.mape,
                    filename,
                };
                Some((key, result))
            })
            .collect()
    }
}

/// Text drawn in the corner of a rolling figure
fn rolling_annotation(order: ArimaOrder, aic: f64, metrics: &ErrorMetrics) -> String {
    let mut text = format!("ARIMA{}  AIC: {:.2}  RMSE: {:.2}", order, aic, metrics.rmse);
    if let Some(mape) = metrics.mape {
        text.push_str(&format!("  MAPE: {:.1}%", mape));
    }
    text
}

/// Test-split length a column yields under `train_ratio`
fn expected_test_len(values: &[Option<f64>], train_ratio: f64) -> usize {
    let n = first_present(values).map_or(0, |start| values.len() - start);
    n - (n as f64 * train_ratio) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_align_rolling_truncates_to_shorter() {
        let (f, a) = align_rolling(&[1.0, 2.0, 3.0], &[1.5, 2.5]);
        assert_eq!(f, vec![1.0, 2.0]);
        assert_eq!(a, vec![1.5, 2.5]);

        let (f, a) = align_rolling(&[1.0], &[1.5, 2.5, 3.5]);
        assert_eq!(f.len(), 1);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_expected_test_len_skips_leading_gap() {
        let mut values = vec![None; 3];
        values.extend((0..10).map(|i| Some(i as f64)));
        assert_eq!(expected_test_len(&values, 0.7), 3);
        assert_eq!(expected_test_len(&[None, None], 0.7), 0);
    }

    #[test]
    fn test_rolling_annotation_reports_mape_when_defined() {
        let order = ArimaOrder::new(1, 0, 0);
        let mut metrics = ErrorMetrics {
            mae: 2.0,
            rmse: 2.5,
            mape: Some(12.34),
        };
        assert_eq!(
            rolling_annotation(order, 101.0, &metrics),
            "ARIMA(1, 0, 0)  AIC: 101.00  RMSE: 2.50  MAPE: 12.3%"
        );
        metrics.mape = None;
        assert_eq!(
            rolling_annotation(order, 101.0, &metrics),
            "ARIMA(1, 0, 0)  AIC: 101.00  RMSE: 2.50"
        );
    }

    #[test]
    fn test_figure_names() {
        let key = PageKey::new("en", "Earthquake");
        assert_eq!(arima_figure_name(&key), "arima_en_Earthquake.svg");
        assert_eq!(rolling_figure_name(&key), "arima_rolling_en_Earthquake.svg");
    }
}
