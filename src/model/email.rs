//! The parsed email entity.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::address::EmailAddress;
use super::attachment::Attachment;

/// One email parsed out of an MSG container.
///
/// Built once by the model builder and immutable for the rest of the
/// conversion run. Attachment order is the container's encounter order and
/// drives the merge order of the final PDF.
#[derive(Debug, Clone)]
pub struct Email {
    /// Decoded subject, empty if the container carries none.
    pub subject: String,

    /// Sender, assembled from the sender-name and SMTP-address properties.
    pub sender: EmailAddress,

    /// All recipients in container order, To/Cc/Bcc mixed.
    pub recipients: Vec<Recipient>,

    /// Client submit time (when the message was sent).
    pub sent: Option<DateTime<Utc>>,

    /// Message delivery time (when the message was received).
    pub received: Option<DateTime<Utc>>,

    /// Body variants. At least one is always present, possibly empty.
    pub body: Body,

    /// Attachments in container order, inline images included.
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Recipients of the given kind, preserving container order.
    pub fn recipients_of(&self, kind: RecipientKind) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter().filter(move |r| r.kind == kind)
    }

    /// Formatted `To:` line for the header block.
    pub fn to_line(&self) -> String {
        join_recipients(self.recipients_of(RecipientKind::To))
    }

    /// Formatted `Cc:` line for the header block (empty if no Cc recipients).
    pub fn cc_line(&self) -> String {
        join_recipients(self.recipients_of(RecipientKind::Cc))
    }

    /// The timestamp to show in the header block: sent time, falling back to
    /// delivery time.
    pub fn display_date(&self) -> Option<DateTime<Utc>> {
        self.sent.or(self.received)
    }
}

fn join_recipients<'a>(iter: impl Iterator<Item = &'a Recipient>) -> String {
    iter.map(|r| r.address.display())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One recipient entry.
#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    /// Name and SMTP address.
    pub address: EmailAddress,
    /// To, Cc or Bcc.
    pub kind: RecipientKind,
}

/// Recipient class, from the `PR_RECIPIENT_TYPE` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    /// Map the raw `PR_RECIPIENT_TYPE` value. Unknown values default to To,
    /// which keeps the recipient visible rather than dropping it.
    pub fn from_mapi(value: i32) -> Self {
        match value {
            2 => Self::Cc,
            3 => Self::Bcc,
            _ => Self::To,
        }
    }
}

/// Body variants carried by the container.
///
/// Invariant: an `Email` always holds at least one present variant — the
/// builder substitutes an empty plain-text body when the container has none.
#[derive(Debug, Clone, Default)]
pub struct Body {
    /// Plain-text body (`PR_BODY`).
    pub text: Option<String>,

    /// HTML body (`PR_HTML`), already decoded to a string.
    pub html: Option<String>,

    /// Compressed RTF body (`PR_RTF_COMPRESSED`), kept as raw bytes.
    /// Never used for rendering; surfaced in inspect output only.
    pub rtf_compressed: Option<Vec<u8>>,
}

impl Body {
    /// The variant that drives rendering: HTML preferred, plain text as
    /// fallback. Always returns something; an email with no body at all
    /// yields an empty plain-text variant.
    pub fn authoritative(&self) -> BodyVariant<'_> {
        if let Some(html) = &self.html {
            BodyVariant::Html(html)
        } else {
            BodyVariant::Plain(self.text.as_deref().unwrap_or(""))
        }
    }

    /// Whether every variant is absent or empty.
    pub fn is_empty(&self) -> bool {
        self.html.as_deref().map_or(true, str::is_empty)
            && self.text.as_deref().map_or(true, str::is_empty)
            && self.rtf_compressed.as_deref().map_or(true, |b| b.is_empty())
    }
}

/// The authoritative body variant chosen for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyVariant<'a> {
    Html(&'a str),
    Plain(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(name: &str, addr: &str, kind: RecipientKind) -> Recipient {
        Recipient {
            address: EmailAddress::new(name, addr),
            kind,
        }
    }

    #[test]
    fn test_authoritative_prefers_html() {
        let body = Body {
            text: Some("plain".into()),
            html: Some("<p>html</p>".into()),
            rtf_compressed: None,
        };
        assert_eq!(body.authoritative(), BodyVariant::Html("<p>html</p>"));
    }

    #[test]
    fn test_authoritative_falls_back_to_plain() {
        let body = Body {
            text: Some("plain".into()),
            html: None,
            rtf_compressed: None,
        };
        assert_eq!(body.authoritative(), BodyVariant::Plain("plain"));
    }

    #[test]
    fn test_authoritative_never_absent() {
        let body = Body::default();
        assert_eq!(body.authoritative(), BodyVariant::Plain(""));
        assert!(body.is_empty());
    }

    #[test]
    fn test_to_cc_lines() {
        let email = Email {
            subject: "s".into(),
            sender: EmailAddress::new("", "from@example.com"),
            recipients: vec![
                recipient("Alice", "alice@example.com", RecipientKind::To),
                recipient("", "bob@example.com", RecipientKind::Cc),
                recipient("Carol", "carol@example.com", RecipientKind::To),
            ],
            sent: None,
            received: None,
            body: Body::default(),
            attachments: Vec::new(),
        };
        assert_eq!(
            email.to_line(),
            "Alice <alice@example.com>, Carol <carol@example.com>"
        );
        assert_eq!(email.cc_line(), "bob@example.com");
    }

    #[test]
    fn test_recipient_kind_from_mapi() {
        assert_eq!(RecipientKind::from_mapi(1), RecipientKind::To);
        assert_eq!(RecipientKind::from_mapi(2), RecipientKind::Cc);
        assert_eq!(RecipientKind::from_mapi(3), RecipientKind::Bcc);
        assert_eq!(RecipientKind::from_mapi(99), RecipientKind::To);
    }
}
