//! Centralized error types for msg2pdf.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::report::FailureKind;

/// All errors produced by the msg2pdf library.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The compound container's binary structure is unreadable or corrupt.
    #[error("Malformed MSG container: {reason}")]
    MalformedContainer { reason: String },

    /// Embedded messages nest deeper than the supported limit.
    #[error("Embedded message nesting exceeds depth {depth}")]
    AttachmentTooDeep { depth: usize },

    /// The rendering engine rejected the body document.
    #[error("Body rendering failed: {reason}")]
    RenderingFailed { reason: String },

    /// A merge fragment was not a well-formed PDF. Planner output is
    /// validated before assembly, so this indicates an internal error.
    #[error("PDF assembly failed: {reason}")]
    AssemblyFailed { reason: String },

    /// The conversion was cancelled cooperatively.
    #[error("Conversion cancelled")]
    Cancelled,
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `MalformedContainer` with a reason string.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedContainer {
            reason: reason.into(),
        }
    }

    /// The report-level failure kind for this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Io { .. } => FailureKind::Io,
            Self::MalformedContainer { .. } => FailureKind::MalformedContainer,
            Self::AttachmentTooDeep { .. } => FailureKind::AttachmentTooDeep,
            Self::RenderingFailed { .. } => FailureKind::RenderingFailed,
            Self::AssemblyFailed { .. } | Self::Cancelled => FailureKind::AssemblyFailed,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `ConvertError`
/// when no path context is available (rare — prefer `ConvertError::io`).
impl From<std::io::Error> for ConvertError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
