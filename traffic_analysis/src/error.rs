//! Error types for the traffic_analysis crate

use thiserror::Error;
use trend_math::MathError;
use wiki_traffic::TrafficError;

/// Custom error types for the traffic_analysis crate
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A statistical fit or computation failed for one unit
    #[error("Compute failure for {unit}: {reason}")]
    ComputeFailure { unit: String, reason: String },

    /// A results directory or file could not be written
    #[error("Persistence failure at {path}: {reason}")]
    PersistenceFailure { path: String, reason: String },

    /// Cached CSV rows and figures disagree
    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Rendering a figure failed
    #[error("Plot error: {0}")]
    Plot(String),

    /// Error from parameter validation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error from the numeric kernels
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from the traffic data layer
    #[error("Traffic data error: {0}")]
    Traffic(#[from] TrafficError),

    /// Error from CSV reading or writing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    /// Wrap any error as a compute failure for `unit`
    pub fn compute(unit: impl Into<String>, reason: impl ToString) -> Self {
        AnalysisError::ComputeFailure {
            unit: unit.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap any error as a persistence failure at `path`
    pub fn persistence(path: &std::path::Path, reason: impl ToString) -> Self {
        AnalysisError::PersistenceFailure {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
