//! Autocorrelation engine
//!
//! Missing values are zero-filled, the trailing window is mean-centred and
//! its self-correlation is normalised so that lag 0 is exactly 1.

use crate::cache::{read_records, write_records, Deadline, FigureStore, KeyedLocks};
use crate::error::{AnalysisError, Result};
use crate::plot::FigureRenderer;
use crate::{group_by_subject, Grouped, SubjectGroups};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use trend_math::correlation::autocorrelation;
use trend_math::fill::zero_fill;
use wiki_traffic::{PageKey, TrafficTable};

/// Autocorrelation of one page column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocorrResult {
    pub subject: String,
    pub language: String,
    pub plot_filename: String,
    /// Values for lags `0..n`
    pub autocorrelation: Vec<f64>,
}

impl Grouped for AutocorrResult {
    fn subject(&self) -> &str {
        &self.subject
    }
}

/// One row of `autocorrelation_results.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AutocorrRecord {
    #[serde(rename = "Column")]
    column: String,
    #[serde(rename = "Lag")]
    lag: usize,
    #[serde(rename = "Autocorrelation")]
    autocorrelation: f64,
}

pub fn autocorr_figure_name(key: &PageKey) -> String {
    format!("auto_corr_{}.svg", key.file_stem())
}

/// Autocorrelation with figure and CSV caching
pub struct AutocorrelationEngine {
    figures: FigureStore,
    results_path: PathBuf,
    renderer: FigureRenderer,
    locks: KeyedLocks,
}

impl AutocorrelationEngine {
    /// Create a new engine writing figures to `figures_dir`
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(figures_dir: P, results_path: Q) -> Self {
        Self {
            figures: FigureStore::new(figures_dir),
            results_path: results_path.into(),
            renderer: FigureRenderer::default(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn figures(&self) -> &FigureStore {
        &self.figures
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Compute the autocorrelation of every column over the trailing `window_days`
    ///
    /// A degenerate column is skipped. A render failure ends the loop and the
    /// results gathered so far are kept; failing to write the results CSV is
    /// returned as an error.
    pub fn compute(
        &self,
        table: &TrafficTable,
        window_days: usize,
        deadline: &Deadline,
    ) -> Result<SubjectGroups<AutocorrResult>> {
        if window_days == 0 {
            return Err(AnalysisError::InvalidParameter(
                "Autocorrelation window must be greater than zero".to_string(),
            ));
        }
        if table.is_empty() {
            info!("Traffic table is empty, skipping autocorrelation");
            return Ok(SubjectGroups::new());
        }
        info!(columns = table.width(), window_days, "Running autocorrelation");
        self.figures.ensure()?;

        let expected_lags = window_days.min(table.len());
        let mut cached = self.load_cached(expected_lags);
        let mut results = Vec::new();
        let mut recomputed = false;

        for (key, values) in table.columns() {
            if deadline.expired() {
                warn!("Deadline reached, returning partial autocorrelation results");
                break;
            }
            if let Some(hit) = cached.remove(key) {
                debug!(column = %key, "Using cached autocorrelation");
                results.push(hit);
                continue;
            }

            let outcome = self.locks.with_lock(&key.column_name(), || {
                self.compute_column(key, values, window_days)
            });
            match outcome {
                Ok(result) => {
                    recomputed = true;
                    results.push(result);
                }
                Err(e @ AnalysisError::Math(_)) | Err(e @ AnalysisError::ComputeFailure { .. }) => {
                    warn!(column = %key, "Autocorrelation failed: {}", e);
                }
                Err(e) => {
                    error!(column = %key, "Autocorrelation stopped: {}", e);
                    break;
                }
            }
        }

        if recomputed {
            self.write_results(&results)?;
        }
        Ok(group_by_subject(results))
    }

    fn compute_column(
        &self,
        key: &PageKey,
        values: &[Option<f64>],
        window_days: usize,
    ) -> Result<AutocorrResult> {
        let series = zero_fill(values);
        let acf = autocorrelation(&series, window_days)
            .map_err(|e| AnalysisError::compute(key.column_name(), e))?;

        let filename = autocorr_figure_name(key);
        self.renderer.render_correlogram(
            &self.figures.path(&filename),
            &format!(
                "Autocorrelation of {} ({}), last {} days",
                key.subject, key.language, window_days
            ),
            &acf,
        )?;

        Ok(AutocorrResult {
            subject: key.subject.clone(),
            language: key.language.clone(),
            plot_filename: filename,
            autocorrelation: acf,
        })
    }

    /// Cached results whose figure exists and whose lag count fits the request
    fn load_cached(&self, expected_lags: usize) -> BTreeMap<PageKey, AutocorrResult> {
        let records: Vec<AutocorrRecord> = match read_records(&self.results_path) {
            Ok(Some(records)) => records,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.results_path.display(), "Ignoring unreadable autocorrelation cache: {}", e);
                return BTreeMap::new();
            }
        };

        let mut by_key: BTreeMap<PageKey, Vec<AutocorrRecord>> = BTreeMap::new();
        for record in records {
            match record.column.parse::<PageKey>() {
                Ok(key) => by_key.entry(key).or_default().push(record),
                Err(e) => warn!(column = %record.column, "Skipping cached row: {}", e),
            }
        }

        by_key
            .into_iter()
            .filter_map(|(key, mut rows)| {
                let filename = autocorr_figure_name(&key);
                if let Err(miss) = self.figures.require(&filename) {
                    debug!(column = %key, "Autocorrelation cache miss: {}", miss);
                    return None;
                }
                if rows.len() != expected_lags {
                    debug!(column = %key, cached = rows.len(), expected_lags, "Autocorrelation cache miss");
                    return None;
                }
                rows.sort_by_key(|r| r.lag);
                let result = AutocorrResult {
                    subject: key.subject.clone(),
                    language: key.language.clone(),
                    plot_filename: filename,
                    autocorrelation: rows.iter().map(|r| r.autocorrelation).collect(),
                };
                Some((key, result))
            })
            .collect()
    }

    fn write_results(&self, results: &[AutocorrResult]) -> Result<()> {
        let records: Vec<AutocorrRecord> = results
            .iter()
            .flat_map(|r| {
                let column = PageKey::new(r.language.clone(), r.subject.clone()).column_name();
                r.autocorrelation
                    .iter()
                    .enumerate()
                    .map(move |(lag, value)| AutocorrRecord {
                        column: column.clone(),
                        lag,
                        autocorrelation: *value,
                    })
            })
            .collect();
        write_records(&self.results_path, &records)
    }
}
