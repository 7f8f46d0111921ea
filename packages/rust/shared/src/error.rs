//! Error types for TenderScope.
//!
//! Library crates use [`TenderScopeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all TenderScope operations.
#[derive(Debug, thiserror::Error)]
pub enum TenderScopeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP failure after retry exhaustion.
    #[error("transport error: {0}")]
    Transport(String),

    /// Rendered content does not match the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Page count undiscoverable or navigation failed.
    #[error("pagination error: {0}")]
    Pagination(String),

    /// Render capability failure (session, adapter or protocol error).
    #[error("render error: {0}")]
    Render(String),

    /// A bounded wait for rendered content expired.
    #[error("timed out after {waited_ms}ms waiting for `{selector}`")]
    Timeout { selector: String, waited_ms: u64 },

    /// External relevance assessment failed or returned an unexpected shape.
    #[error("scoring error: {0}")]
    Scoring(String),

    /// Historical store unreadable or unwritable.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid format, out-of-range value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TenderScopeError>;

/// Coarse failure classes reported in the run summary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Parse,
    Pagination,
    Render,
    Timeout,
    Scoring,
    Persistence,
    Config,
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Parse => "parse",
            Self::Pagination => "pagination",
            Self::Render => "render",
            Self::Timeout => "timeout",
            Self::Scoring => "scoring",
            Self::Persistence => "persistence",
            Self::Config => "config",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TenderScopeError {
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

    /// The failure class this error is counted under.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config { .. } => FailureKind::Config,
            Self::Transport(_) => FailureKind::Transport,
            Self::Parse { .. } => FailureKind::Parse,
            Self::Pagination(_) => FailureKind::Pagination,
            Self::Render(_) => FailureKind::Render,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Scoring(_) => FailureKind::Scoring,
            Self::Persistence(_) | Self::Io { .. } => FailureKind::Persistence,
            Self::Validation { .. } => FailureKind::Validation,
        }
    }

    /// Whether this error must terminate the run.
    ///
    /// Only store I/O and configuration problems are fatal; everything else is
    /// demoted to a skipped page or record at its origin.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::Io { .. } | Self::Config { .. }
        )
    }
}
