//! Attachment payloads and merge dispositions.

use serde::Serialize;

use super::email::Email;

/// One attachment extracted from the container, payload included.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Display filename. Generated (`attachment_N`) if the container has none.
    pub filename: String,

    /// Declared MIME content type (e.g. `"image/png"`, `"application/pdf"`).
    /// `application/octet-stream` when the container declares nothing.
    pub content_type: String,

    /// Decoded binary payload. Empty for embedded messages.
    pub data: Vec<u8>,

    /// Content-ID used by inline `cid:` references in the HTML body.
    pub content_id: Option<String>,

    /// Parsed sub-message for embedded-message attachments.
    pub embedded: Option<Box<Email>>,
}

impl Attachment {
    /// Whether this attachment is an embedded sub-message.
    pub fn is_embedded_message(&self) -> bool {
        self.embedded.is_some()
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Human-readable size (`"3.4 kB"`).
    pub fn size_display(&self) -> String {
        use humansize::{format_size, DECIMAL};
        format_size(self.size(), DECIMAL)
    }

    /// Lowercased filename extension, without the dot.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
    }
}

/// How the planner handles one non-inline attachment.
///
/// This table is a stable external contract — downstream tooling relies on
/// the resulting page order:
///
/// | Disposition | Applies to | Transform |
/// |---|---|---|
/// | `MergeAsPdf` | PDF content type | bytes pass through unchanged |
/// | `ConvertToPdf` | raster image types | one fit-to-page PDF page |
/// | `ListOnly` | everything else | name and type listed in the body |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    MergeAsPdf,
    ConvertToPdf,
    ListOnly,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MergeAsPdf => "merge-as-pdf",
            Self::ConvertToPdf => "convert-to-pdf",
            Self::ListOnly => "list-only",
        };
        write!(f, "{s}")
    }
}
