//! Cross-correlation engine
//!
//! Every unordered pair of language versions of one subject is correlated
//! over lags `-max_lag..=max_lag`. The lag with the largest absolute
//! correlation wins; pairs whose signed correlation there falls below the
//! threshold are dropped.

use crate::cache::{read_records, write_records, Deadline, FigureStore, KeyedLocks};
use crate::error::{AnalysisError, Result};
use crate::plot::FigureRenderer;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use trend_math::correlation::best_lag;
use trend_math::fill::zero_fill;
use wiki_traffic::{PageKey, TrafficTable};

/// Default keep threshold on the signed best-lag correlation
pub const DEFAULT_MIN_CORRELATION: f64 = 0.5;

/// Best-lag correlation between two pages of one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrPair {
    pub subject: String,
    pub page_1: String,
    pub page_2: String,
    pub best_lag: i64,
    pub max_correlation: f64,
    pub plot_filename: String,
}

/// One row of `cross_correlation.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CrossCorrRecord {
    subject: String,
    #[serde(rename = "Page 1")]
    page_1: String,
    #[serde(rename = "Page 2")]
    page_2: String,
    #[serde(rename = "Best Lag")]
    best_lag: i64,
    #[serde(rename = "Max Correlation")]
    max_correlation: f64,
}

/// Figure name of a pair searched over `-max_lag..=max_lag`
pub fn cross_corr_figure_name(first: &PageKey, second: &PageKey, max_lag: usize) -> String {
    format!("{}{}.svg", figure_prefix(first, second), max_lag)
}

fn figure_prefix(first: &PageKey, second: &PageKey) -> String {
    format!("cross_corr_{}_{}_lag", first.file_stem(), second.file_stem())
}

/// Pairwise cross-correlation with figure and CSV caching
pub struct CrossCorrelationEngine {
    figures: FigureStore,
    results_path: PathBuf,
    min_correlation: f64,
    renderer: FigureRenderer,
    locks: KeyedLocks,
}

impl CrossCorrelationEngine {
    /// Create a new engine with the default 0.5 threshold
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(figures_dir: P, results_path: Q) -> Self {
        Self {
            figures: FigureStore::new(figures_dir),
            results_path: results_path.into(),
            min_correlation: DEFAULT_MIN_CORRELATION,
            renderer: FigureRenderer::default(),
            locks: KeyedLocks::new(),
        }
    }

    /// Set the keep threshold applied to the signed correlation
    pub fn with_min_correlation(mut self, min_correlation: f64) -> Result<Self> {
        if !(-1.0..=1.0).contains(&min_correlation) {
            return Err(AnalysisError::InvalidParameter(
                "Correlation threshold must lie in [-1, 1]".to_string(),
            ));
        }
        self.min_correlation = min_correlation;
        Ok(self)
    }

    pub fn figures(&self) -> &FigureStore {
        &self.figures
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Correlate all same-subject pairs, strongest first
    pub fn compute(
        &self,
        table: &TrafficTable,
        max_lag: usize,
        deadline: &Deadline,
    ) -> Result<Vec<CrossCorrPair>> {
        if table.is_empty() {
            info!("Traffic table is empty, skipping cross-correlation");
            return Ok(Vec::new());
        }
        info!(columns = table.width(), max_lag, "Running cross-correlation");
        self.figures.ensure()?;

        let cached = self.load_cached(table, max_lag);
        let mut pairs = Vec::new();
        let mut changed = false;

        'subjects: for (subject, keys) in table.subjects() {
            for (i, first) in keys.iter().enumerate() {
                for second in &keys[i + 1..] {
                    if deadline.expired() {
                        warn!("Deadline reached, returning partial cross-correlation results");
                        break 'subjects;
                    }
                    let id = (first.column_name(), second.column_name());
                    if let Some(hit) = cached.get(&id) {
                        debug!(page_1 = %first, page_2 = %second, "Using cached pair");
                        pairs.push(hit.clone());
                        continue;
                    }

                    let lock_key = format!("{}|{}", id.0, id.1);
                    let outcome = self.locks.with_lock(&lock_key, || {
                        self.correlate_pair(&subject, table, first, second, max_lag)
                    });
                    match outcome {
                        Ok(Some(pair)) => {
                            changed = true;
                            pairs.push(pair);
                        }
                        Ok(None) => {}
                        Err(e @ AnalysisError::PersistenceFailure { .. }) => return Err(e),
                        Err(e) => {
                            warn!(page_1 = %first, page_2 = %second, "Cross-correlation failed: {}", e)
                        }
                    }
                }
            }
        }

        pairs.sort_by(|a, b| {
            b.max_correlation
                .partial_cmp(&a.max_correlation)
                .unwrap_or(Ordering::Equal)
        });

        if changed || pairs.len() != cached.len() {
            let records: Vec<CrossCorrRecord> = pairs
                .iter()
                .map(|p| CrossCorrRecord {
                    subject: p.subject.clone(),
                    page_1: p.page_1.clone(),
                    page_2: p.page_2.clone(),
                    best_lag: p.best_lag,
                    max_correlation: p.max_correlation,
                })
                .collect();
            write_records(&self.results_path, &records)?;
            info!(path = %self.results_path.display(), pairs = pairs.len(), "Cross-correlation written");
        }
        Ok(pairs)
    }

    fn correlate_pair(
        &self,
        subject: &str,
        table: &TrafficTable,
        first: &PageKey,
        second: &PageKey,
        max_lag: usize,
    ) -> Result<Option<CrossCorrPair>> {
        self.remove_stale_figures(first, second)?;
        let x = zero_fill(table.column(first).unwrap_or_default());
        let y = zero_fill(table.column(second).unwrap_or_default());
        let (lag, r) = best_lag(&x, &y, max_lag).map_err(|e| {
            AnalysisError::compute(format!("{} / {}", first, second), e)
        })?;

        if r < self.min_correlation {
            debug!(page_1 = %first, page_2 = %second, correlation = r, "Pair below threshold");
            return Ok(None);
        }

        let filename = cross_corr_figure_name(first, second, max_lag);
        let dates = table.dates();
        let points = |values: &[f64]| -> Vec<_> {
            dates.iter().copied().zip(values.iter().copied()).collect()
        };
        self.renderer.render_pair(
            &self.figures.path(&filename),
            &format!("{}: best lag {} (r = {:.2})", subject, lag, r),
            (&first.column_name(), &points(&x)),
            (&second.column_name(), &points(&y)),
        )?;

        Ok(Some(CrossCorrPair {
            subject: subject.to_string(),
            page_1: first.column_name(),
            page_2: second.column_name(),
            best_lag: lag,
            max_correlation: r,
            plot_filename: filename,
        }))
    }

    /// Drop this pair's figures from earlier lag ranges
    ///
    /// The CSV row is about to be replaced, so a figure drawn for another
    /// range would otherwise vouch for a row it no longer describes.
    fn remove_stale_figures(&self, first: &PageKey, second: &PageKey) -> Result<()> {
        let prefix = figure_prefix(first, second);
        for name in self.figures.list()? {
            let lag = name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(".svg"))
                .and_then(|lag| lag.parse::<usize>().ok());
            if lag.is_none() {
                continue;
            }
            let path = self.figures.path(&name);
            fs::remove_file(&path).map_err(|e| {
                error!(path = %path.display(), "Cannot remove stale figure: {}", e);
                AnalysisError::persistence(&path, e)
            })?;
            debug!(page_1 = %first, page_2 = %second, figure = %name, "Removed stale figure");
        }
        Ok(())
    }

    /// Cached pairs still backed by the table, a figure for this lag range and the threshold
    fn load_cached(
        &self,
        table: &TrafficTable,
        max_lag: usize,
    ) -> BTreeMap<(String, String), CrossCorrPair> {
        let rows: Vec<CrossCorrRecord> = match read_records(&self.results_path) {
            Ok(Some(rows)) => rows,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.results_path.display(), "Ignoring unreadable cross-correlation cache: {}", e);
                return BTreeMap::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                let first = row.page_1.parse::<PageKey>().ok()?;
                let second = row.page_2.parse::<PageKey>().ok()?;
                if table.column(&first).is_none() || table.column(&second).is_none() {
                    return None;
                }
                let filename = cross_corr_figure_name(&first, &second, max_lag);
                if let Err(miss) = self.figures.require(&filename) {
                    debug!(page_1 = %first, page_2 = %second, "Cross-correlation cache miss: {}", miss);
                    return None;
                }
                if row.best_lag.unsigned_abs() as usize > max_lag
                    || row.max_correlation < self.min_correlation
                {
                    debug!(page_1 = %first, page_2 = %second, "Cross-correlation cache miss");
                    return None;
                }
                let pair = CrossCorrPair {
                    subject: row.subject,
                    page_1: row.page_1,
                    page_2: row.page_2,
                    best_lag: row.best_lag,
                    max_correlation: row.max_correlation,
                    plot_filename: filename,
                };
                Some(((pair.page_1.clone(), pair.page_2.clone()), pair))
            })
            .collect()
    }
}
