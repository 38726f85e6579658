//! Unified error type for reframe.
//!
//! Every crate funnels its failures into [`Error`]. The variants follow the
//! containment rules of the job engine: encode and analysis failures are
//! absorbed by their fallback chains, tool failures become task failures at
//! the task boundary, and only validation, lookup, and persistence failures
//! reach a caller. [`Error::http_status`] lets the HTTP layer pick a status
//! code without matching on variants itself.

use std::fmt;

/// Unified error type covering all failure modes in reframe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing input at submission time.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown job id or missing artifact.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A write was attempted against a record that no longer accepts it.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// One format's processing failed. The job continues.
    #[error("Task error [{platform}/{format}]: {message}")]
    Task {
        /// Platform identifier of the failed task.
        platform: String,
        /// Format name of the failed task.
        format: String,
        /// Human-readable cause.
        message: String,
    },

    /// A spawned process failed or is unavailable.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An optimizer tier could not encode its input.
    #[error("Encode error [{encoder}]: {message}")]
    Encode {
        /// Encoder that failed.
        encoder: String,
        /// Human-readable error description.
        message: String,
    },

    /// Subject analysis failed.
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// The job store could not apply an operation.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            Error::Task { .. } => 422,
            Error::Tool { .. } => 502,
            Error::Encode { .. } => 500,
            Error::Analysis(_) => 502,
            Error::Persistence(_) => 503,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Task { .. } => "task_error",
            Error::Tool { .. } => "tool_error",
            Error::Encode { .. } => "encode_error",
            Error::Analysis(_) => "analysis_error",
            Error::Persistence(_) => "persistence_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Encode`].
    pub fn encode(encoder: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Encode {
            encoder: encoder.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Task`].
    pub fn task(
        platform: impl Into<String>,
        format: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Task {
            platform: platform.into(),
            format: format.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
