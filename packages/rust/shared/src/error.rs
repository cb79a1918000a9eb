//! Error types for AutoFormatter.
//!
//! Library crates use [`AutoFormatterError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all AutoFormatter operations.
#[derive(Debug, thiserror::Error)]
pub enum AutoFormatterError {
    /// The external converter exited non-zero or produced unreadable output.
    #[error("conversion failed for {path:?}: {message}")]
    Conversion { path: PathBuf, message: String },

    /// The AI response contained no `===FILE: name===` markers.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A registry entry points at a file that does not exist.
    #[error("component '{id}' is missing: {path:?}")]
    ComponentMissing { id: String, path: PathBuf },

    /// The automation host raised a fatal error while merging.
    #[error("assembly failed: {0}")]
    Assembly(String),

    /// The destination file is held open by another process.
    #[error("output target is locked by another program: {path:?}")]
    TargetLocked { path: PathBuf },

    /// The user cancelled at a human-gated wait point.
    #[error("build cancelled by user")]
    Cancelled,

    /// The AI transform call failed (HTTP, auth, malformed reply).
    #[error("transform error: {0}")]
    Transform(String),

    /// Automation host protocol or process error outside a merge.
    #[error("automation host error: {0}")]
    Host(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Request or data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A background worker panicked or was torn down early.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AutoFormatterError>;

impl AutoFormatterError {
    /// Create a conversion error for the given input path.
    pub fn conversion(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A follow-up suggestion for the user, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::TargetLocked { path } => Some(format!(
                "close the program holding {} (e.g. a word processor) and retry; \
                 existing files are never overwritten while open",
                path.display()
            )),
            Self::Parse { .. } => Some(
                "check that the AI reply uses the `===FILE: name===` markers".to_string(),
            ),
            Self::Host(_) | Self::Assembly(_) => Some(
                "make sure no dialog from the document host is blocking it and no stale host process is running"
                    .to_string(),
            ),
            _ => None,
        }
    }
}
