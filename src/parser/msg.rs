//! Email model builder: maps container storages onto the [`Email`] entity.
//!
//! Degrades gracefully — missing optional properties become empty or absent
//! fields; only structural container corruption (surfaced by the reader) and
//! runaway embedded-message nesting are fatal.

use tracing::debug;

use super::cfb::{CompoundFile, NodeId};
use super::properties::{prop, PropertyBag, StorageKind};
use crate::error::{ConvertError, Result};
use crate::model::address::EmailAddress;
use crate::model::attachment::Attachment;
use crate::model::email::{Body, Email, Recipient, RecipientKind};

/// Maximum nesting of embedded messages. A forward-of-a-forward chain stays
/// well under this; anything deeper (or a directory cycle posing as one)
/// fails with `AttachmentTooDeep` instead of recursing unbounded.
pub const MAX_EMBED_DEPTH: usize = 8;

const RECIP_PREFIX: &str = "__recip_version1.0_#";
const ATTACH_PREFIX: &str = "__attach_version1.0_#";

/// Build the email model from a parsed container.
pub fn build_email(cfb: &CompoundFile) -> Result<Email> {
    build_message(cfb, cfb.root(), StorageKind::Message, 0)
}

fn build_message(
    cfb: &CompoundFile,
    storage: NodeId,
    kind: StorageKind,
    depth: usize,
) -> Result<Email> {
    if depth > MAX_EMBED_DEPTH {
        return Err(ConvertError::AttachmentTooDeep { depth });
    }

    let props = PropertyBag::from_storage(cfb, storage, kind);

    let sender = EmailAddress::new(
        props.string(prop::SENDER_NAME).unwrap_or_default(),
        props
            .string(prop::SENDER_SMTP_ADDRESS)
            .or_else(|| props.string(prop::SENDER_EMAIL))
            .unwrap_or_default(),
    );

    Ok(Email {
        subject: props.string(prop::SUBJECT).unwrap_or_default(),
        sender,
        recipients: build_recipients(cfb, storage, &props),
        sent: props.time(prop::CLIENT_SUBMIT_TIME),
        received: props.time(prop::MESSAGE_DELIVERY_TIME),
        body: build_body(&props),
        attachments: build_attachments(cfb, storage, depth)?,
    })
}

/// Collect recipients from `__recip_version1.0_#NNNNNNNN` storages in
/// container order. Falls back to splitting the display headers when a
/// message carries no recipient storages at all.
fn build_recipients(cfb: &CompoundFile, storage: NodeId, message: &PropertyBag) -> Vec<Recipient> {
    let mut recipients = Vec::new();

    for node in cfb.storages_with_prefix(storage, RECIP_PREFIX) {
        let bag = PropertyBag::from_storage(cfb, node, StorageKind::Sub);
        let address = EmailAddress::new(
            bag.string(prop::DISPLAY_NAME).unwrap_or_default(),
            bag.string(prop::SMTP_ADDRESS)
                .or_else(|| bag.string(prop::EMAIL_ADDRESS))
                .unwrap_or_default(),
        );
        if address.is_empty() {
            debug!("skipping recipient storage with no name or address");
            continue;
        }
        let kind = bag
            .int(prop::RECIPIENT_TYPE)
            .map(RecipientKind::from_mapi)
            .unwrap_or(RecipientKind::To);
        recipients.push(Recipient { address, kind });
    }

    if recipients.is_empty() {
        for (id, kind) in [
            (prop::DISPLAY_TO, RecipientKind::To),
            (prop::DISPLAY_CC, RecipientKind::Cc),
        ] {
            if let Some(display) = message.string(id) {
                recipients.extend(
                    EmailAddress::parse_display_list(&display)
                        .into_iter()
                        .map(|address| Recipient { address, kind }),
                );
            }
        }
    }

    recipients
}

/// Assemble the body variants. The invariant that at least one variant is
/// present is maintained here: a message with no body at all gets an empty
/// plain-text variant.
fn build_body(props: &PropertyBag) -> Body {
    let text = props.string(prop::BODY);

    // PR_HTML is binary in the wild; some writers store it as a string.
    let html = props
        .binary(prop::HTML)
        .map(decode_html_bytes)
        .or_else(|| props.string(prop::HTML));

    let rtf_compressed = props.binary(prop::RTF_COMPRESSED).map(<[u8]>::to_vec);

    let mut body = Body {
        text,
        html,
        rtf_compressed,
    };
    if body.text.is_none() && body.html.is_none() {
        body.text = Some(String::new());
    }
    body
}

/// Decode HTML body bytes: strict UTF-8 first, windows-1252 otherwise.
fn decode_html_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_end_matches('\0').to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.trim_end_matches('\0').to_string()
        }
    }
}

/// Collect attachments from `__attach_version1.0_#NNNNNNNN` storages in
/// container order. Embedded messages recurse with a depth bound.
fn build_attachments(cfb: &CompoundFile, storage: NodeId, depth: usize) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::new();

    for (index, node) in cfb.storages_with_prefix(storage, ATTACH_PREFIX).enumerate() {
        let bag = PropertyBag::from_storage(cfb, node, StorageKind::Sub);

        let embedded = match bag.object(prop::ATTACH_DATA) {
            Some(sub) => Some(Box::new(build_message(
                cfb,
                sub,
                StorageKind::EmbeddedMessage,
                depth + 1,
            )?)),
            None => None,
        };

        let data = bag
            .binary(prop::ATTACH_DATA)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        let has_name =
            bag.has(prop::ATTACH_LONG_FILENAME) || bag.has(prop::ATTACH_FILENAME);
        if data.is_empty() && embedded.is_none() && !has_name {
            debug!(index, "skipping attachment storage with no payload");
            continue;
        }

        let filename = attachment_filename(&bag, embedded.as_deref(), index);
        let content_type = bag
            .string(prop::ATTACH_MIME_TAG)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| guess_content_type(&filename));
        let content_id = bag
            .string(prop::ATTACH_CONTENT_ID)
            .map(|cid| strip_cid(&cid))
            .filter(|cid| !cid.is_empty());

        attachments.push(Attachment {
            filename,
            content_type,
            data,
            content_id,
            embedded,
        });
    }

    Ok(attachments)
}

/// Display filename: long name, short name, then a generated fallback.
/// Embedded messages borrow their subject.
fn attachment_filename(bag: &PropertyBag, embedded: Option<&Email>, index: usize) -> String {
    if let Some(name) = bag
        .string(prop::ATTACH_LONG_FILENAME)
        .or_else(|| bag.string(prop::ATTACH_FILENAME))
        .filter(|s| !s.is_empty())
    {
        return name;
    }

    if let Some(email) = embedded {
        if !email.subject.is_empty() {
            return format!("{}.msg", email.subject);
        }
        return format!("attachment_{index}.msg");
    }

    match bag.string(prop::ATTACH_EXTENSION).filter(|s| !s.is_empty()) {
        Some(ext) => format!("attachment_{index}{ext}"),
        None => format!("attachment_{index}"),
    }
}

/// Strip the angle brackets Outlook wraps around content ids.
fn strip_cid(cid: &str) -> String {
    cid.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Declared-type fallback when the container carries no MIME tag.
fn guess_content_type(filename: &str) -> String {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let mime = match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("zip") => "application/zip",
        Some("msg") => "application/vnd.ms-outlook",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    };
    mime.to_string()
}
