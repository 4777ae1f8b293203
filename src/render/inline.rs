//! Inline-image resolution: `cid:` references → embedded data URIs.
//!
//! The HTML body references inline images as `cid:<content-id>`. Each
//! reference that matches an attachment's content id (case-insensitive,
//! exact) is replaced with a self-contained `data:` URI so the rendering
//! engine needs no external file access. Non-matching references are left
//! untouched — the engine shows a broken-image placeholder, which is
//! acceptable degraded output, never an error.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use crate::model::attachment::Attachment;

/// Replace resolvable `cid:` references in `html`.
///
/// Returns the rewritten markup and the indices of attachments that were
/// consumed as inline images (referenced at least once).
pub fn resolve_inline_references(
    html: &str,
    attachments: &[Attachment],
) -> (String, HashSet<usize>) {
    let mut resolved = html.to_string();
    let mut consumed = HashSet::new();

    for (index, attachment) in attachments.iter().enumerate() {
        let Some(cid) = &attachment.content_id else {
            continue;
        };
        if cid.is_empty() {
            continue;
        }

        let needle = format!("cid:{cid}");
        let replacement = data_uri(attachment);
        let (rewritten, count) = replace_all_ignore_case(&resolved, &needle, &replacement);
        if count > 0 {
            debug!(cid = %cid, count, "resolved inline reference");
            resolved = rewritten;
            consumed.insert(index);
        }
    }

    (resolved, consumed)
}

/// Self-contained representation of the image bytes.
fn data_uri(attachment: &Attachment) -> String {
    format!(
        "data:{};base64,{}",
        attachment.content_type,
        BASE64.encode(&attachment.data)
    )
}

/// Replace every case-insensitive occurrence of `needle`, returning the new
/// string and the replacement count.
fn replace_all_ignore_case(haystack: &str, needle: &str, replacement: &str) -> (String, usize) {
    if needle.is_empty() {
        return (haystack.to_string(), 0);
    }

    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();

    // Lowercasing can change byte lengths for non-ASCII text, which would
    // desynchronize the indices; fall back to exact matching in that case.
    if lower_haystack.len() != haystack.len() || lower_needle.len() != needle.len() {
        let count = haystack.matches(needle).count();
        return (haystack.replace(needle, replacement), count);
    }

    let mut out = String::with_capacity(haystack.len());
    let mut count = 0;
    let mut pos = 0;
    while let Some(found) = lower_haystack[pos..].find(&lower_needle) {
        let start = pos + found;
        out.push_str(&haystack[pos..start]);
        out.push_str(replacement);
        pos = start + needle.len();
        count += 1;
    }
    out.push_str(&haystack[pos..]);
    (out, count)
}
