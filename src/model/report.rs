//! Per-file conversion outcomes and the aggregate batch report.

use std::path::PathBuf;

use serde::Serialize;

/// Failure classification for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Filesystem error reading the source or writing the output.
    Io,
    /// Corrupt or truncated compound-container structure.
    MalformedContainer,
    /// Embedded messages nested past the depth limit.
    AttachmentTooDeep,
    /// The rendering engine rejected the body.
    RenderingFailed,
    /// A merge fragment was not well-formed PDF (internal error).
    AssemblyFailed,
}

/// Terminal state of one file's pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// Output written and renamed into place.
    Succeeded {
        output: PathBuf,
        bytes: u64,
        pages: usize,
    },
    /// The pipeline failed; no output was left behind.
    Failed {
        kind: FailureKind,
        message: String,
    },
    /// Cooperative shutdown hit before the file finished.
    Cancelled,
}

/// Outcome of converting one source file.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// The source container path.
    pub source: PathBuf,

    /// Terminal outcome.
    pub outcome: Outcome,

    /// Non-fatal per-attachment problems (conversions downgraded to
    /// list-only, skipped duplicates, …).
    pub warnings: Vec<String>,
}

impl ConversionResult {
    /// A successful result.
    pub fn succeeded(source: PathBuf, output: PathBuf, bytes: u64, pages: usize) -> Self {
        Self {
            source,
            outcome: Outcome::Succeeded {
                output,
                bytes,
                pages,
            },
            warnings: Vec::new(),
        }
    }

    /// A failed result.
    pub fn failed(source: PathBuf, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            source,
            outcome: Outcome::Failed {
                kind,
                message: message.into(),
            },
            warnings: Vec::new(),
        }
    }

    /// A cancelled result.
    pub fn cancelled(source: PathBuf) -> Self {
        Self {
            source,
            outcome: Outcome::Cancelled,
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Outcome::Cancelled)
    }
}

/// Aggregate over one batch invocation.
///
/// `results` keeps discovery order, not completion order, so repeated runs
/// over the same tree produce diffable reports regardless of worker count.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Per-file results in discovery order.
    pub results: Vec<ConversionResult>,
}

impl BatchReport {
    pub fn new(results: Vec<ConversionResult>) -> Self {
        Self { results }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.results.iter().filter(|r| r.is_cancelled()).count()
    }

    /// Failed results only, in discovery order.
    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| r.is_failure())
    }
}
