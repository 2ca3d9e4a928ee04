//! # Wikitrends
//!
//! Trend analysis of daily Wikipedia page views.
//!
//! Tracked pages are grouped by subject across languages. Their daily views
//! are fetched into a date-indexed table, and four engines run over it:
//!
//! - peak detection
//! - autocorrelation over a trailing window
//! - cross-correlation between language versions of a subject
//! - ARIMA forecasting, plain or as a rolling one-step evaluation
//!
//! ## Quick Start
//!
//! ```no_run
//! use wikitrends::{AnalysisRequest, AppConfig, Pipeline};
//!
//! let config = AppConfig::load(None)?;
//! let pipeline = Pipeline::open(config)?;
//!
//! let today = chrono::Utc::now().date_naive();
//! pipeline.refresh(today, false)?;
//!
//! let request = AnalysisRequest::from_config(pipeline.config());
//! let response = pipeline.handle_request(&request);
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod update;

// Re-export commonly used types
pub use crate::config::{AppConfig, ConfigError};
pub use crate::error::{PipelineError, Result};
pub use crate::pipeline::{
    AnalysisReport, AnalysisRequest, AnalysisResponse, Pipeline, GENERIC_FAILURE,
};
pub use crate::update::UpdateLog;
