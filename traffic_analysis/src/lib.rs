//! # Traffic Analysis
//!
//! Analysis engines over a [`wiki_traffic::TrafficTable`] of daily page views.
//!
//! ## Features
//!
//! - Peak detection with a widening distance/prominence search
//! - Autocorrelation over a trailing window
//! - Lagged cross-correlation between language versions of one subject
//! - ARIMA forecasting with AIC order selection, plain or rolling
//!
//! Every engine caches its results as a CSV file plus one SVG figure per
//! unit. A cached unit is reused only while its figure is still on disk.
//!
//! ## Quick Start
//!
//! ```no_run
//! use traffic_analysis::{Deadline, PeakEngine};
//! use wiki_traffic::{SqliteStore, TrafficTable};
//!
//! let store = SqliteStore::open("instance/database.db")?;
//! let table = TrafficTable::load(&store)?;
//!
//! let engine = PeakEngine::new("static/peaks_figures", "files/peaks_results.csv");
//! let peaks = engine.detect(&table, 5, &Deadline::none())?;
//! for (subject, results) in &peaks {
//!     println!("{}: {} pages with peaks", subject, results.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;

pub mod autocorr;
pub mod cache;
pub mod crosscorr;
pub mod error;
pub mod forecast;
pub mod models;
pub mod peaks;
pub mod plot;
pub mod utils;

pub use autocorr::{AutocorrResult, AutocorrelationEngine};
pub use cache::{Deadline, FigureStore};
pub use crosscorr::{CrossCorrPair, CrossCorrelationEngine};
pub use error::{AnalysisError, Result};
pub use forecast::{
    ForecastEngine, ForecastMode, ForecastOutcome, ForecastPaths, PlainForecast, RollingForecast,
};
pub use models::arima::{AicGridSearch, ArimaModel, ArimaOrder, OrderSelector};
pub use peaks::{PeakEngine, PeakFinder, PeakResult, ProminencePeakFinder};
pub use plot::FigureRenderer;

/// Results keyed by subject, each subject holding one entry per page or pair
pub type SubjectGroups<T> = BTreeMap<String, Vec<T>>;

/// A result that belongs to one subject
pub trait Grouped {
    fn subject(&self) -> &str;
}

/// Group results by subject, keeping their order within each subject
pub fn group_by_subject<T: Grouped>(results: Vec<T>) -> SubjectGroups<T> {
    let mut groups = SubjectGroups::new();
    for result in results {
        groups
            .entry(result.subject().to_string())
            .or_insert_with(Vec::new)
            .push(result);
    }
    groups
}
