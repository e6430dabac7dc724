//! Error types for exercise analysis operations.
//!
//! Missing inputs (absent keypoints, absent reference data, absent
//! classifier model) are *not* errors: components degrade to a documented
//! neutral behavior instead. The variants here cover configuration
//! validation and stored-document parsing, which callers may want to
//! surface.

use thiserror::Error;

/// Main error type for exercise analysis operations.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored document (reference, weights, classifier) is malformed.
    #[error("Malformed {kind} document: {detail}")]
    MalformedDocument {
        /// Document kind ("reference", "weights", "classifier").
        kind: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// A stored document names a different exercise than the session.
    #[error("Exercise mismatch: document is for {found}, session expects {expected}")]
    ExerciseMismatch {
        /// Exercise tag found in the document.
        found: String,
        /// Exercise tag the session was built for.
        expected: String,
    },

    /// I/O failure while reading a stored document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for exercise analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
