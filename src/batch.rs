//! Batch orchestration: file discovery, the bounded worker pool, and the
//! order-stable report.
//!
//! Every file's pipeline run is fully isolated — a failure (or even a panic
//! in a decoder) becomes that file's result entry and never terminates
//! sibling work. Results are collected in discovery order regardless of
//! which worker finished first, so identical inputs produce diffable
//! reports at any worker count.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::convert::{CancelToken, ConvertOptions, Converter};
use crate::error::{ConvertError, Result};
use crate::model::report::{BatchReport, ConversionResult, FailureKind};

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 4;

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Fixed worker-pool size.
    pub workers: usize,
    /// Per-file conversion options (output directory included).
    pub convert: ConvertOptions,
}

impl BatchOptions {
    pub fn new(convert: ConvertOptions) -> Self {
        Self {
            recursive: false,
            workers: DEFAULT_WORKERS,
            convert,
        }
    }
}

/// Progress callback: `(completed, total)`. Called from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Discover candidate files under `root` in stable lexical order.
///
/// `root` may be a single file (returned as-is) or a directory searched for
/// `.msg` files, optionally recursively. Unreadable directory entries are
/// skipped with a warning.
pub fn discover_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(ConvertError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        ));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("msg"))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    warn_duplicate_stems(&files);
    Ok(files)
}

/// Outputs are named by source stem, so two sources with the same stem
/// collide in the output directory. Not deduplicated; the later file wins.
fn warn_duplicate_stems(files: &[PathBuf]) {
    let mut seen = HashSet::new();
    for file in files {
        if let Some(stem) = file.file_stem() {
            if !seen.insert(stem.to_owned()) {
                warn!(
                    file = %file.display(),
                    "duplicate output name, an earlier conversion will be overwritten"
                );
            }
        }
    }
}

/// Discover files under `root` and convert them all.
pub fn run(
    converter: &Converter,
    root: &Path,
    options: &BatchOptions,
    cancel: &CancelToken,
    progress: Option<ProgressFn<'_>>,
) -> Result<BatchReport> {
    let files = discover_files(root, options.recursive)?;
    run_files(converter, &files, options, cancel, progress)
}

/// Convert an already-discovered file list under a bounded worker pool.
///
/// The report's entries are in `files` order. Files picked up after
/// cancellation is requested report `Cancelled` without starting work.
pub fn run_files(
    converter: &Converter,
    files: &[PathBuf],
    options: &BatchOptions,
    cancel: &CancelToken,
    progress: Option<ProgressFn<'_>>,
) -> Result<BatchReport> {
    info!(files = files.len(), workers = options.workers, "starting batch");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|i| format!("msg2pdf-worker-{i}"))
        .build()
        .map_err(|e| {
            ConvertError::io(
                "<worker pool>",
                std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            )
        })?;

    let completed = AtomicUsize::new(0);
    let total = files.len();

    let results: Vec<ConversionResult> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let result = convert_isolated(converter, path, &options.convert, cancel);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress {
                    cb(done, total);
                }
                result
            })
            .collect()
    });

    let report = BatchReport::new(results);
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "batch finished"
    );
    Ok(report)
}

/// One file, fully isolated: errors are already folded into the result by
/// the converter; a panic escaping a decoder is contained here and reported
/// as an internal error.
fn convert_isolated(
    converter: &Converter,
    path: &Path,
    options: &ConvertOptions,
    cancel: &CancelToken,
) -> ConversionResult {
    if cancel.is_cancelled() {
        return ConversionResult::cancelled(path.to_path_buf());
    }

    match catch_unwind(AssertUnwindSafe(|| {
        converter.convert_file(path, options, cancel)
    })) {
        Ok(result) => result,
        Err(panic) => ConversionResult::failed(
            path.to_path_buf(),
            FailureKind::AssemblyFailed,
            format!("internal error: {}", panic_message(&panic)),
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
