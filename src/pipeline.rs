//! Request pipeline: traffic table in, grouped analysis results out

use crate::config::AppConfig;
use crate::error::Result;
use crate::update::UpdateLog;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};
use traffic_analysis::cache::remove_file;
use traffic_analysis::{
    AicGridSearch, AutocorrResult, AutocorrelationEngine, CrossCorrPair, CrossCorrelationEngine,
    Deadline, ForecastEngine, ForecastMode, ForecastOutcome, ForecastPaths, OrderSelector,
    PeakEngine, PeakResult, SubjectGroups,
};
use wiki_traffic::{PageViewSource, SqliteStore, TrafficTable, TrafficTableBuilder, WikimediaClient};

/// Parameters of one analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub target_peak_count: usize,
    pub window_days: usize,
    pub max_lag: usize,
    pub forecast: ForecastMode,
}

impl AnalysisRequest {
    /// Request built from the configured defaults
    pub fn from_config(config: &AppConfig) -> Self {
        let forecast = if config.forecast.rolling {
            ForecastMode::Rolling {
                train_ratio: config.forecast.train_ratio,
            }
        } else {
            ForecastMode::Plain {
                steps: config.forecast.steps,
            }
        };
        Self {
            target_peak_count: config.peaks.target_peak_count,
            window_days: config.autocorrelation.window_days,
            max_lag: config.cross_correlation.max_lag,
            forecast,
        }
    }
}

/// Results of all four engines for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    /// Days in the analysed traffic table
    pub days: usize,
    pub peaks: SubjectGroups<PeakResult>,
    pub autocorrelation: SubjectGroups<AutocorrResult>,
    pub cross_correlation: Vec<CrossCorrPair>,
    pub forecast: ForecastOutcome,
}

/// What a caller of [`Pipeline::handle_request`] sees
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisResponse {
    Success { report: AnalysisReport },
    Failure { message: String },
}

/// Message returned for any failed request; details stay in the logs
pub const GENERIC_FAILURE: &str = "analysis request failed";

/// Wires the store, the page-view source and the four engines together
pub struct Pipeline<P = WikimediaClient, S = AicGridSearch> {
    config: AppConfig,
    store: SqliteStore,
    source: P,
    peaks: PeakEngine,
    autocorrelation: AutocorrelationEngine,
    cross_correlation: CrossCorrelationEngine,
    forecast: ForecastEngine<S>,
    update_log: UpdateLog,
}

impl Pipeline<WikimediaClient, AicGridSearch> {
    /// Open the configured database and Wikimedia client
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.database_path)?;
        let client = WikimediaClient::new(
            &config.user_agent,
            Duration::from_secs(config.fetch_timeout_secs),
        )?;
        Self::with_parts(config, store, client, AicGridSearch::default())
    }
}

impl<P: PageViewSource, S: OrderSelector> Pipeline<P, S> {
    /// Create a new pipeline from explicit collaborators
    pub fn with_parts(config: AppConfig, store: SqliteStore, source: P, selector: S) -> Result<Self> {
        let peaks = PeakEngine::new(config.peaks_figures(), config.peaks_results());
        let autocorrelation = AutocorrelationEngine::new(
            config.autocorrelation_figures(),
            config.autocorrelation_results(),
        );
        let cross_correlation = CrossCorrelationEngine::new(
            config.cross_correlation_figures(),
            config.cross_correlation_results(),
        )
        .with_min_correlation(config.cross_correlation.min_correlation)?;
        let forecast = ForecastEngine::with_selector(
            selector,
            ForecastPaths::standard(&config.figures_dir, &config.data_dir),
        );
        let update_log = UpdateLog::new(&config.update_log);

        Ok(Self {
            config,
            store,
            source,
            peaks,
            autocorrelation,
            cross_correlation,
            forecast,
            update_log,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn update_log(&self) -> &UpdateLog {
        &self.update_log
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_secs(self.config.request_timeout_secs)
    }

    /// Fetch every tracked page up to `today`, persist and mirror the table
    pub fn build_traffic_table(&self, today: NaiveDate) -> Result<TrafficTable> {
        let table = TrafficTableBuilder::new(&self.store, &self.source, today).build()?;
        table.persist(&self.store, self.config.traffic_csv())?;
        Ok(table)
    }

    /// Reload the table from the store, falling back to the CSV mirror
    pub fn load_traffic_table(&self) -> Result<TrafficTable> {
        let table = TrafficTable::load(&self.store)?;
        if !table.is_empty() {
            return Ok(table);
        }

        let mirror = self.config.traffic_csv();
        if mirror.is_file() {
            info!(path = %mirror.display(), "Store is empty, loading the CSV mirror");
            return Ok(TrafficTable::read_csv(mirror)?);
        }
        Ok(table)
    }

    pub fn run_peak_detection(
        &self,
        table: &TrafficTable,
        target_peak_count: usize,
    ) -> Result<SubjectGroups<PeakResult>> {
        Ok(self.peaks.detect(table, target_peak_count, &self.deadline())?)
    }

    pub fn run_autocorrelation(
        &self,
        table: &TrafficTable,
        window_days: usize,
    ) -> Result<SubjectGroups<AutocorrResult>> {
        Ok(self
            .autocorrelation
            .compute(table, window_days, &self.deadline())?)
    }

    pub fn run_cross_correlation(
        &self,
        table: &TrafficTable,
        max_lag: usize,
    ) -> Result<Vec<CrossCorrPair>> {
        Ok(self
            .cross_correlation
            .compute(table, max_lag, &self.deadline())?)
    }

    pub fn run_forecast(&self, table: &TrafficTable, mode: ForecastMode) -> Result<ForecastOutcome> {
        Ok(self.forecast.run(table, mode, &self.deadline())?)
    }

    /// Run all four engines in sequence on the stored traffic table
    ///
    /// One deadline covers the whole request; engines that start after it
    /// expires return empty results.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport> {
        let table = self.load_traffic_table()?;
        info!(
            days = table.len(),
            pages = table.width(),
            "Running analysis request"
        );
        let deadline = self.deadline();

        let peaks = self
            .peaks
            .detect(&table, request.target_peak_count, &deadline)?;
        let autocorrelation = self
            .autocorrelation
            .compute(&table, request.window_days, &deadline)?;
        let cross_correlation = self
            .cross_correlation
            .compute(&table, request.max_lag, &deadline)?;
        let forecast = self.forecast.run(&table, request.forecast, &deadline)?;

        if deadline.expired() {
            warn!("Analysis request ran past its deadline, results are partial");
        }

        Ok(AnalysisReport {
            days: table.len(),
            peaks,
            autocorrelation,
            cross_correlation,
            forecast,
        })
    }

    /// Run a request, logging any error and returning a generic failure
    pub fn handle_request(&self, request: &AnalysisRequest) -> AnalysisResponse {
        match self.analyze(request) {
            Ok(report) => AnalysisResponse::Success { report },
            Err(e) => {
                error!(error = ?e, "Analysis request failed: {}", e);
                AnalysisResponse::Failure {
                    message: GENERIC_FAILURE.to_string(),
                }
            }
        }
    }

    /// Refresh traffic data at most once a day unless forced
    ///
    /// Returns whether a refresh happened.
    pub fn refresh(&self, today: NaiveDate, force: bool) -> Result<bool> {
        if !force && self.update_log.has_updated_today(today) {
            info!(%today, "Traffic data already updated today");
            return Ok(false);
        }

        self.reset()?;
        let table = self.build_traffic_table(today)?;
        self.update_log.record(today)?;
        info!(%today, days = table.len(), pages = table.width(), "Traffic data refreshed");
        Ok(true)
    }

    /// Remove cached results, the traffic mirror and every figure
    pub fn reset(&self) -> Result<()> {
        info!("Resetting cached results");
        let csvs = [
            self.config.traffic_csv(),
            self.config.peaks_results(),
            self.config.autocorrelation_results(),
            self.config.cross_correlation_results(),
        ];
        for path in csvs.iter().map(|p| p.as_path()).chain(self.forecast.results_paths()) {
            remove_file(path)?;
        }

        let figures = [
            self.peaks.figures(),
            self.autocorrelation.figures(),
            self.cross_correlation.figures(),
        ];
        for store in figures.into_iter().chain(self.forecast.figure_stores()) {
            store.clear()?;
        }
        Ok(())
    }
}
