//! Error types for pgcursor.

use thiserror::Error;

/// The main error type for cursor pool operations.
#[derive(Debug, Error)]
pub enum CursorError {
    /// The cursor id contained no usable characters after sanitization.
    #[error("Invalid cursor id: {0:?}")]
    InvalidIdentifier(String),

    /// `DECLARE ... CURSOR` was rejected by the database.
    #[error("Failed to declare cursor {id}: {message}")]
    DeclareFailed { id: String, message: String },

    /// Scanning to the end of the cursor, or rewinding it, failed.
    #[error("Failed to measure cursor {id}: {message}")]
    MeasureFailed { id: String, message: String },

    /// No live session is registered under this id.
    #[error("No cursor found with id {0:?}")]
    SessionNotFound(String),

    /// Pulling or decoding a page failed. The session is retired.
    #[error("Failed to fetch from cursor {id}: {message}")]
    FetchFailed { id: String, message: String },

    /// One or more cursors could not be closed.
    #[error("Failed to close {} cursor(s): {}", .0.len(), .0.join("; "))]
    CloseFailed(Vec<String>),

    /// The pool has been shut down.
    #[error("Cursor pool is closed")]
    Closed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CursorError {
    pub(crate) fn declare(id: &str, message: impl ToString) -> Self {
        Self::DeclareFailed {
            id: id.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn measure(id: &str, message: impl ToString) -> Self {
        Self::MeasureFailed {
            id: id.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn fetch(id: &str, message: impl ToString) -> Self {
        Self::FetchFailed {
            id: id.to_string(),
            message: message.to_string(),
        }
    }

    /// HTTP status code for this error.
    ///
    /// Unknown and expired ids are "not found"; declaration and database
    /// failures are server-side.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentifier(_) => 400,
            Self::SessionNotFound(_) => 404,
            Self::Closed => 503,
            Self::DeclareFailed { .. }
            | Self::MeasureFailed { .. }
            | Self::FetchFailed { .. }
            | Self::CloseFailed(_)
            | Self::Config(_)
            | Self::Connection(_)
            | Self::Io(_) => 500,
        }
    }
}

/// Result type alias for cursor pool operations.
pub type CursorResult<T> = Result<T, CursorError>;
