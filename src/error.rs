//! Error types for the wikitrends pipeline

use crate::config::ConfigError;
use thiserror::Error;
use traffic_analysis::AnalysisError;
use wiki_traffic::TrafficError;

/// Errors surfaced by the pipeline and the CLI
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error from the traffic data layer
    #[error("Traffic data error: {0}")]
    Traffic(#[from] TrafficError),

    /// Error from an analysis engine
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Error from JSON reading or writing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catalog record the command refers to does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, PipelineError>;
