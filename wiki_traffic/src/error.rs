//! Error types for the wiki_traffic crate

use thiserror::Error;

/// Custom error types for the wiki_traffic crate
#[derive(Debug, Error)]
pub enum TrafficError {
    /// The page-view source could not deliver a page's series
    #[error("Page-view source unavailable for {page}: {reason}")]
    SourceUnavailable { page: String, reason: String },

    /// A tracked page's event or start date could not be resolved
    #[error("Could not resolve {page}: {reason}")]
    ResolutionFailure { page: String, reason: String },

    /// Writing the table to durable storage failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A column name that is not `{language}_{subject}`
    #[error("Invalid page column: {0}")]
    InvalidColumn(String),

    /// Error from SQLite operations
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    Polars(String),

    /// Error from JSON decoding
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, TrafficError>;

impl From<polars::prelude::PolarsError> for TrafficError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        TrafficError::Polars(err.to_string())
    }
}
