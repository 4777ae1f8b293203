//! The external rendering capability seam.
//!
//! Converting HTML to paginated PDF is delegated behind [`RenderEngine`] so
//! the pipeline does not care which engine does the work. The built-in
//! [`TextLayoutEngine`] lays the document out as wrapped text pages; a
//! browser-grade HTML engine can be plugged in without touching the
//! pipeline.

use printpdf::{BuiltinFont, Mm, PdfDocument};
use thiserror::Error;

use super::html::html_to_text;

/// Error raised by a rendering engine.
#[derive(Debug, Error)]
#[error("render engine: {0}")]
pub struct EngineError(pub String);

/// An HTML-to-PDF rendering capability.
pub trait RenderEngine: Send + Sync {
    /// Render one HTML document into a PDF byte stream. The output must
    /// contain at least one page, even for an empty document.
    fn render_html(&self, html: &str) -> Result<Vec<u8>, EngineError>;
}

/// Text-layout engine: HTML is reduced to plain text and paginated onto A4
/// pages. Inline images and styling are dropped; structure (paragraphs,
/// list items, table rows) survives as line breaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLayoutEngine;

/// Characters per wrapped line at the layout font size.
const WRAP_COLUMNS: usize = 96;

impl RenderEngine for TextLayoutEngine {
    fn render_html(&self, html: &str) -> Result<Vec<u8>, EngineError> {
        let text = html_to_text(html);
        let lines = wrap_lines(&text, WRAP_COLUMNS);
        render_text_pages(&lines).map_err(|e| EngineError(e))
    }
}

/// Lay wrapped lines out on A4 pages. Always emits at least one page.
fn render_text_pages(lines: &[String]) -> Result<Vec<u8>, String> {
    let page_width = 210.0;
    let page_height = 297.0;
    let margin = 18.0;
    let line_height = 4.6;
    let font_size = 10.0;

    let (doc, first_page, first_layer) =
        PdfDocument::new("Email", Mm(page_width), Mm(page_height), "body");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| e.to_string())?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = page_height - margin;

    for line in lines {
        if y < margin {
            let (page, layer_index) = doc.add_page(Mm(page_width), Mm(page_height), "body");
            layer = doc.get_page(page).get_layer(layer_index);
            y = page_height - margin;
        }
        if !line.is_empty() {
            layer.use_text(line.clone(), font_size, Mm(margin), Mm(y), &font);
        }
        y -= line_height;
    }

    doc.save_to_bytes().map_err(|e| e.to_string())
}

/// Wrap text to `columns` characters, breaking on whitespace where possible.
fn wrap_lines(text: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= columns {
            out.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();
            if current_len > 0 && current_len + 1 + word_len > columns {
                out.push(std::mem::take(&mut current));
            }
            if word_len > columns {
                // An unbreakable run longer than the line: hard-split it.
                for chunk in chunk_chars(word, columns) {
                    out.push(chunk);
                }
                continue;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            out.push(current);
        }
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn chunk_chars(word: &str, columns: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(columns)
        .map(|c| c.iter().collect())
        .collect()
}
