//! Email address handling.

use serde::{Deserialize, Serialize};

/// A sender or recipient address.
///
/// MSG containers usually store the display name and the SMTP address as
/// separate properties, so unlike RFC 5322 parsing this is mostly a holder
/// type. [`EmailAddress::parse`] exists for the header-string fallback path
/// (`PR_DISPLAY_TO` and friends) where only a formatted string is available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`), may be empty for X.400-style
    /// entries that carry no SMTP address.
    pub address: String,
}

impl EmailAddress {
    /// Build from separate name/address properties, tolerating absence of either.
    pub fn new(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            address: address.into(),
        }
    }

    /// Parse a single formatted address: `"Name <user@domain>"`, `"<user@domain>"`
    /// or a bare string. A string without an address part is kept as a display name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::new("", "");
        }

        if let Some(angle_start) = trimmed.rfind('<') {
            if let Some(angle_end) = trimmed.rfind('>') {
                if angle_end > angle_start {
                    let addr = trimmed[angle_start + 1..angle_end].trim().to_string();
                    let name = strip_quotes(trimmed[..angle_start].trim());
                    return Self {
                        display_name: name,
                        address: addr,
                    };
                }
            }
        }

        if trimmed.contains('@') {
            return Self::new("", trimmed);
        }

        Self::new(trimmed, "")
    }

    /// Split a display-header string (`PR_DISPLAY_TO` style) into addresses.
    ///
    /// Outlook joins entries with `;`; comma is accepted as a fallback when
    /// no semicolon is present.
    pub fn parse_display_list(raw: &str) -> Vec<Self> {
        let sep = if raw.contains(';') { ';' } else { ',' };
        raw.split(sep)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Format for display: `"Display Name <address>"`, or whichever part exists.
    pub fn display(&self) -> String {
        match (self.display_name.is_empty(), self.address.is_empty()) {
            (false, false) => format!("{} <{}>", self.display_name, self.address),
            (false, true) => self.display_name.clone(),
            _ => self.address.clone(),
        }
    }

    /// Whether both parts are empty.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_empty() && self.address.is_empty()
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
