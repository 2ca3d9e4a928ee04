//! Peak detection engine
//!
//! Each page column is smoothed, standardised and searched for peaks with
//! a widening distance/prominence search until no more than the requested
//! number of peaks remain.

use crate::cache::{read_records, write_records, Deadline, FigureStore, KeyedLocks};
use crate::error::{AnalysisError, Result};
use crate::plot::FigureRenderer;
use crate::{group_by_subject, SubjectGroups};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use trend_math::peaks::{find_peaks, PeakParams, PeakSet};
use trend_math::smoothing::smooth_and_standardise;
use wiki_traffic::{PageKey, TrafficTable};

/// Distance growth per widening step
const DISTANCE_STEP: f64 = 1.01;
/// Prominence growth per widening step
const PROMINENCE_STEP: f64 = 1.02;
/// Prominence the search starts from
const INITIAL_PROMINENCE: f64 = 0.5;

/// Peaks detected in one page column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakResult {
    pub subject: String,
    pub language: String,
    pub dates: Vec<NaiveDate>,
    /// Smoothed, standardised values at the peaks
    pub values: Vec<f64>,
    pub filename: String,
    /// Mean spacing between consecutive peaks, in seconds
    pub avg_distance: Option<f64>,
    pub avg_prominence: Option<f64>,
}

impl crate::Grouped for PeakResult {
    fn subject(&self) -> &str {
        &self.subject
    }
}

/// One row of `peaks_results.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PeakRecord {
    event_name: String,
    language: String,
    date: NaiveDate,
    traffic_value: f64,
}

/// Locates peaks in a standardised series
pub trait PeakFinder {
    fn find(&self, data: &[f64], params: &PeakParams) -> trend_math::Result<PeakSet>;
}

/// Distance-then-prominence peak finder from `trend_math`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProminencePeakFinder;

impl PeakFinder for ProminencePeakFinder {
    fn find(&self, data: &[f64], params: &PeakParams) -> trend_math::Result<PeakSet> {
        find_peaks(data, params)
    }
}

/// Figure file name for a page column
pub fn peak_figure_name(key: &PageKey) -> String {
    format!("peaks_{}.svg", key.file_stem())
}

/// Peak detection with figure and CSV caching
pub struct PeakEngine<F = ProminencePeakFinder> {
    finder: F,
    figures: FigureStore,
    results_path: PathBuf,
    renderer: FigureRenderer,
    locks: KeyedLocks,
}

impl PeakEngine<ProminencePeakFinder> {
    /// Create a new engine writing figures to `figures_dir`
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(figures_dir: P, results_path: Q) -> Self {
        Self::with_finder(ProminencePeakFinder, figures_dir, results_path)
    }
}

impl<F: PeakFinder> PeakEngine<F> {
    /// Create a new engine with a custom peak finder
    pub fn with_finder<P: Into<PathBuf>, Q: Into<PathBuf>>(
        finder: F,
        figures_dir: P,
        results_path: Q,
    ) -> Self {
        Self {
            finder,
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

    /// Detect peaks in every column, reusing cached units where valid
    pub fn detect(
        &self,
        table: &TrafficTable,
        target_peak_count: usize,
        deadline: &Deadline,
    ) -> Result<SubjectGroups<PeakResult>> {
        info!(columns = table.width(), target_peak_count, "Running peak detection");
        if table.is_empty() {
            return Ok(SubjectGroups::new());
        }
        self.figures.ensure()?;

        let mut cached = self.load_cached(target_peak_count);
        let mut results = Vec::new();
        let mut recomputed = false;

        for (key, values) in table.columns() {
            if deadline.expired() {
                warn!("Deadline reached, returning partial peak results");
                break;
            }
            if let Some(hit) = cached.remove(key) {
                debug!(column = %key, "Using cached peaks");
                results.push(hit);
                continue;
            }

            let outcome = self.locks.with_lock(&key.column_name(), || {
                self.detect_column(key, table.dates(), values, target_peak_count)
            });
            match outcome {
                Ok(Some(result)) => {
                    recomputed = true;
                    results.push(result);
                }
                Ok(None) => {
                    recomputed = true;
                    info!(column = %key, "No peaks detected");
                }
                Err(e @ AnalysisError::PersistenceFailure { .. }) => return Err(e),
                Err(e) => warn!(column = %key, "Peak detection failed: {}", e),
            }
        }

        if recomputed {
            self.write_results(&results)?;
        }
        Ok(group_by_subject(results))
    }

    fn detect_column(
        &self,
        key: &PageKey,
        dates: &[NaiveDate],
        values: &[Option<f64>],
        target: usize,
    ) -> Result<Option<PeakResult>> {
        let present: Vec<(NaiveDate, f64)> = dates
            .iter()
            .zip(values)
            .filter_map(|(d, v)| v.filter(|v| v.is_finite()).map(|v| (*d, v)))
            .collect();
        if present.is_empty() {
            return Ok(None);
        }

        let raw: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
        let normalized = smooth_and_standardise(&raw)?;
        let peaks = self.widening_search(&normalized, target)?;
        if peaks.is_empty() {
            return Ok(None);
        }

        let series: Vec<(NaiveDate, f64)> = present
            .iter()
            .zip(&normalized)
            .map(|((d, _), z)| (*d, *z))
            .collect();
        let points: Vec<(NaiveDate, f64)> = peaks.indices.iter().map(|&i| series[i]).collect();

        let filename = peak_figure_name(key);
        self.renderer.render_peaks(
            &self.figures.path(&filename),
            &format!("Peaks in {} ({})", key.subject, key.language),
            &series,
            &points,
        )?;

        let dates: Vec<NaiveDate> = points.iter().map(|(d, _)| *d).collect();
        Ok(Some(PeakResult {
            subject: key.subject.clone(),
            language: key.language.clone(),
            avg_distance: mean_spacing_secs(&dates),
            avg_prominence: peaks.mean_prominence(),
            values: points.iter().map(|(_, v)| *v).collect(),
            dates,
            filename,
        }))
    }

    /// Widen distance and prominence until at most `target` peaks remain
    fn widening_search(&self, data: &[f64], target: usize) -> Result<PeakSet> {
        let mut params = PeakParams::new((data.len() / 20).max(1) as f64, INITIAL_PROMINENCE);
        loop {
            let peaks = self.finder.find(data, &params)?;
            if peaks.len() <= target {
                return Ok(peaks);
            }
            params.distance *= DISTANCE_STEP;
            params.prominence *= PROMINENCE_STEP;
        }
    }

    /// Cached results that still have their figure and satisfy the target
    fn load_cached(&self, target: usize) -> BTreeMap<PageKey, PeakResult> {
        let records: Vec<PeakRecord> = match read_records(&self.results_path) {
            Ok(Some(records)) => records,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.results_path.display(), "Ignoring unreadable peak cache: {}", e);
                return BTreeMap::new();
            }
        };

        let mut by_key: BTreeMap<PageKey, Vec<PeakRecord>> = BTreeMap::new();
        for record in records {
            by_key
                .entry(PageKey::new(record.language.clone(), record.event_name.clone()))
                .or_default()
                .push(record);
        }

        by_key
            .into_iter()
            .filter_map(|(key, rows)| {
                let filename = peak_figure_name(&key);
                if let Err(miss) = self.figures.require(&filename) {
                    debug!(column = %key, "Peak cache miss: {}", miss);
                    return None;
                }
                if rows.len() > target {
                    return None;
                }
                let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
                let result = PeakResult {
                    subject: key.subject.clone(),
                    language: key.language.clone(),
                    avg_distance: mean_spacing_secs(&dates),
                    avg_prominence: None,
                    values: rows.iter().map(|r| r.traffic_value).collect(),
                    dates,
                    filename,
                };
                Some((key, result))
            })
            .collect()
    }

    fn write_results(&self, results: &[PeakResult]) -> Result<()> {
        let records: Vec<PeakRecord> = results
            .iter()
            .flat_map(|r| {
                r.dates.iter().zip(&r.values).map(move |(date, value)| PeakRecord {
                    event_name: r.subject.clone(),
                    language: r.language.clone(),
                    date: *date,
                    traffic_value: *value,
                })
            })
            .collect();
        write_records(&self.results_path, &records)?;
        info!(path = %self.results_path.display(), rows = records.len(), "Peak results written");
        Ok(())
    }
}

/// Mean gap between consecutive dates in seconds, `None` below two dates
fn mean_spacing_secs(dates: &[NaiveDate]) -> Option<f64> {
    if dates.len() < 2 {
        return None;
    }
    let gaps: Vec<f64> = dates
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64)
        .collect();
    trend_math::mean(&gaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_spacing() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        assert_eq!(mean_spacing_secs(&[d(1)]), None);
        assert_eq!(mean_spacing_secs(&[d(1), d(3), d(5)]), Some(2.0 * 86_400.0));
    }

    #[test]
    fn test_figure_name_uses_escaped_key() {
        assert_eq!(
            peak_figure_name(&PageKey::new("en", "Solar eclipse")),
            "peaks_en_Solar%20eclipse.svg"
        );
    }
}
