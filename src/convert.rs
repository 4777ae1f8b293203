//! Single-file conversion pipeline.
//!
//! Stages per file: parse container → build model → resolve inline images →
//! plan attachments → render body → transform attachments → assemble →
//! atomic write. Each stage boundary checks the cancel token, and the output
//! is written to a temporary file in the destination directory and renamed
//! into place only on success, so a cancelled or failed conversion never
//! leaves a partial file at the final path.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};
use crate::model::attachment::Disposition;
use crate::model::email::{Body, BodyVariant, Email};
use crate::model::report::ConversionResult;
use crate::parser::{cfb::CompoundFile, msg};
use crate::pdf::{assembler, planner};
use crate::render::engine::{RenderEngine, TextLayoutEngine};
use crate::render::html::escape_html;
use crate::render::{self, inline};

/// Options for one conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Merge PDF attachments and converted images into the output.
    pub merge_attachments: bool,
    /// Prepend a banner page naming the source file.
    pub show_source_banner: bool,
    /// Directory the output PDF is written to.
    pub output_dir: PathBuf,
}

impl ConvertOptions {
    /// Defaults per the external interface: merge on, banner on.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            merge_attachments: true,
            show_source_banner: true,
            output_dir: output_dir.into(),
        }
    }
}

/// Cooperative cancellation handle, shared across workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; in-flight files stop at their next stage
    /// boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Error out of the pipeline if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConvertError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Converts MSG containers to PDF through a pluggable rendering engine.
pub struct Converter {
    engine: Box<dyn RenderEngine>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    /// A converter using the built-in text-layout engine.
    pub fn new() -> Self {
        Self {
            engine: Box::new(TextLayoutEngine),
        }
    }

    /// A converter with a custom rendering engine.
    pub fn with_engine(engine: Box<dyn RenderEngine>) -> Self {
        Self { engine }
    }

    /// Convert one file. Never panics across this boundary; every failure
    /// mode is folded into the returned [`ConversionResult`].
    pub fn convert_file(
        &self,
        source: &Path,
        options: &ConvertOptions,
        cancel: &CancelToken,
    ) -> ConversionResult {
        match self.run_pipeline(source, options, cancel) {
            Ok(success) => {
                info!(
                    source = %source.display(),
                    output = %success.output.display(),
                    pages = success.pages,
                    "converted"
                );
                let mut result = ConversionResult::succeeded(
                    source.to_path_buf(),
                    success.output,
                    success.bytes,
                    success.pages,
                );
                result.warnings = success.warnings;
                result
            }
            Err(ConvertError::Cancelled) => {
                debug!(source = %source.display(), "conversion cancelled");
                ConversionResult::cancelled(source.to_path_buf())
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "conversion failed");
                ConversionResult::failed(source.to_path_buf(), e.failure_kind(), e.to_string())
            }
        }
    }

    /// Parse a container and report its structure without writing anything.
    pub fn inspect(&self, source: &Path) -> Result<Inspection> {
        let bytes = std::fs::read(source).map_err(|e| ConvertError::io(source, e))?;
        let container = CompoundFile::parse(bytes)?;
        let email = msg::build_email(&container)?;
        Ok(Inspection::from_email(source.to_path_buf(), &email))
    }

    fn run_pipeline(
        &self,
        source: &Path,
        options: &ConvertOptions,
        cancel: &CancelToken,
    ) -> Result<PipelineSuccess> {
        cancel.check()?;

        // Parsing
        let bytes = std::fs::read(source).map_err(|e| ConvertError::io(source, e))?;
        let container = CompoundFile::parse(bytes)?;
        let email = msg::build_email(&container)?;
        cancel.check()?;

        // Rendering
        let (resolved_html, consumed) = match email.body.authoritative() {
            BodyVariant::Html(html) => {
                let (resolved, consumed) = inline::resolve_inline_references(html, &email.attachments);
                (Some(resolved), consumed)
            }
            BodyVariant::Plain(_) => (None, HashSet::new()),
        };

        let mut plan = planner::plan(&email.attachments, &consumed);
        if !options.merge_attachments {
            for item in &mut plan {
                item.disposition = Disposition::ListOnly;
            }
        }

        let rendered =
            render::render_body(&email, &plan, consumed, resolved_html, self.engine.as_ref())?;
        cancel.check()?;

        // Merging
        let (fragments, warnings) = if options.merge_attachments {
            planner::transform(&plan)
        } else {
            (Vec::new(), Vec::new())
        };

        let mut sections = Vec::with_capacity(fragments.len() + 2);
        if options.show_source_banner {
            sections.push(self.banner_section(source)?);
        }
        sections.push(rendered.pdf);
        sections.extend(fragments.into_iter().map(|f| f.pdf));

        let assembled = assembler::assemble(&sections)?;
        cancel.check()?;

        // Atomic write: temp file in the destination directory, rename on
        // success.
        std::fs::create_dir_all(&options.output_dir)
            .map_err(|e| ConvertError::io(&options.output_dir, e))?;
        let output = output_path(source, &options.output_dir);

        let mut tmp = tempfile::NamedTempFile::new_in(&options.output_dir)
            .map_err(|e| ConvertError::io(&options.output_dir, e))?;
        tmp.write_all(&assembled.bytes)
            .map_err(|e| ConvertError::io(tmp.path(), e))?;
        tmp.persist(&output)
            .map_err(|e| ConvertError::io(&output, e.error))?;

        Ok(PipelineSuccess {
            output,
            bytes: assembled.bytes.len() as u64,
            pages: assembled.pages,
            warnings,
        })
    }

    /// The optional page-1 banner naming the source file.
    fn banner_section(&self, source: &Path) -> Result<Vec<u8>> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let html = format!(
            "<html><body><p><b>Source file:</b></p><p>{}</p></body></html>",
            escape_html(&name)
        );
        self.engine
            .render_html(&html)
            .map_err(|e| ConvertError::RenderingFailed {
                reason: e.to_string(),
            })
    }
}

/// Output PDF path: source stem with the extension swapped.
pub fn output_path(source: &Path, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "converted".to_string());
    output_dir.join(format!("{stem}.pdf"))
}

struct PipelineSuccess {
    output: PathBuf,
    bytes: u64,
    pages: usize,
    warnings: Vec<String>,
}

// ── inspect-only view ───────────────────────────────────────────────

/// Read-only structural report for one container.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub source: PathBuf,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    /// RFC 3339, absent when the container carries no timestamp.
    pub date: Option<String>,
    pub body: BodyInfo,
    pub attachments: Vec<AttachmentInfo>,
}

/// Which body variant renders, and how large it is.
#[derive(Debug, Serialize)]
pub struct BodyInfo {
    pub variant: &'static str,
    pub chars: usize,
    pub has_rtf: bool,
}

/// One attachment with its would-be disposition.
#[derive(Debug, Serialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    /// Consumed as an inline body image.
    pub inline: bool,
    /// Carries a nested message.
    pub embedded: bool,
    /// Merge disposition; absent for inline images.
    pub disposition: Option<Disposition>,
}

impl Inspection {
    fn from_email(source: PathBuf, email: &Email) -> Self {
        let consumed = match email.body.authoritative() {
            BodyVariant::Html(html) => {
                inline::resolve_inline_references(html, &email.attachments).1
            }
            BodyVariant::Plain(_) => HashSet::new(),
        };

        let attachments = email
            .attachments
            .iter()
            .enumerate()
            .map(|(index, att)| {
                let inline = consumed.contains(&index);
                AttachmentInfo {
                    filename: att.filename.clone(),
                    content_type: att.content_type.clone(),
                    size: att.size(),
                    inline,
                    embedded: att.is_embedded_message(),
                    disposition: (!inline).then(|| planner::classify(att)),
                }
            })
            .collect();

        Self {
            source,
            subject: email.subject.clone(),
            from: email.sender.display(),
            to: email.to_line(),
            cc: email.cc_line(),
            date: email.display_date().map(|d| d.to_rfc3339()),
            body: BodyInfo::from_body(&email.body),
            attachments,
        }
    }
}

impl BodyInfo {
    fn from_body(body: &Body) -> Self {
        let (variant, chars) = match body.authoritative() {
            BodyVariant::Html(html) => ("html", html.chars().count()),
            BodyVariant::Plain(text) => ("plain", text.chars().count()),
        };
        Self {
            variant,
            chars,
            has_rtf: body.rtf_compressed.is_some(),
        }
    }
}
