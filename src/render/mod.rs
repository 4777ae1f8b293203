//! Body rendering: inline-image resolution, the HTML document for one
//! message, and the pluggable PDF rendering engine.

pub mod engine;
pub mod html;
pub mod inline;

use std::collections::HashSet;

use crate::error::{ConvertError, Result};
use crate::model::email::{BodyVariant, Email};
use crate::pdf::planner::PlannedAttachment;
use engine::RenderEngine;
use html::escape_html;

/// Output of the body renderer: the rendered PDF section plus the set of
/// attachment indices consumed as inline images.
pub struct RenderedBody {
    pub pdf: Vec<u8>,
    pub consumed: HashSet<usize>,
}

/// Resolve inline references, compose the header block + body + attachment
/// summary into one HTML document, and render it through `engine`.
///
/// Unresolved `cid:` references stay in the markup and render as broken
/// images — degraded output, never an error. Only an engine failure maps to
/// `RenderingFailed`.
pub fn render_body(
    email: &Email,
    plan: &[PlannedAttachment],
    consumed: HashSet<usize>,
    resolved_html: Option<String>,
    engine: &dyn RenderEngine,
) -> Result<RenderedBody> {
    let document = compose_document(email, plan, resolved_html);

    let pdf = engine
        .render_html(&document)
        .map_err(|e| ConvertError::RenderingFailed {
            reason: e.to_string(),
        })?;

    Ok(RenderedBody { pdf, consumed })
}

/// Build the full HTML document for one message.
fn compose_document(
    email: &Email,
    plan: &[PlannedAttachment],
    resolved_html: Option<String>,
) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<html><head><meta charset=\"utf-8\"></head><body>\n");

    // Header block.
    out.push_str(&format!(
        "<p><b>Subject:</b> {}</p>\n",
        escape_html(&email.subject)
    ));
    out.push_str(&format!(
        "<p><b>From:</b> {}</p>\n",
        escape_html(&email.sender.display())
    ));
    let to_line = email.to_line();
    if !to_line.is_empty() {
        out.push_str(&format!("<p><b>To:</b> {}</p>\n", escape_html(&to_line)));
    }
    let cc_line = email.cc_line();
    if !cc_line.is_empty() {
        out.push_str(&format!("<p><b>Cc:</b> {}</p>\n", escape_html(&cc_line)));
    }
    if let Some(date) = email.display_date() {
        out.push_str(&format!(
            "<p><b>Date:</b> {}</p>\n",
            date.format("%B %-d, %Y at %H:%M UTC")
        ));
    }
    out.push_str("<hr>\n");

    // Body: resolved HTML when available, escaped plain text otherwise.
    match (&resolved_html, email.body.authoritative()) {
        (Some(html), _) => out.push_str(html),
        (None, BodyVariant::Html(html)) => out.push_str(html),
        (None, BodyVariant::Plain(text)) => {
            out.push_str("<pre>");
            out.push_str(&escape_html(text));
            out.push_str("</pre>");
        }
    }

    // Attachment summary: every attachment that was not consumed inline,
    // with its disposition spelled out for the list-only ones.
    if !plan.is_empty() {
        out.push_str("\n<hr>\n");
        out.push_str(&format!("<p><b>Attachments ({}):</b></p>\n<ul>\n", plan.len()));
        for item in plan {
            let note = match item.note() {
                Some(note) => format!(" — {note}"),
                None => String::new(),
            };
            out.push_str(&format!(
                "<li>{} ({}, {}){}</li>\n",
                escape_html(&item.attachment.filename),
                escape_html(&item.attachment.content_type),
                item.attachment.size_display(),
                escape_html(&note),
            ));
        }
        out.push_str("</ul>\n");
    }

    out.push_str("</body></html>\n");
    out
}
