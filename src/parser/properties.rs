//! Typed access to the MAPI properties of one storage.
//!
//! The container stores properties in two places: variable-length values
//! (strings, binaries) each get their own `__substg1.0_XXXXYYYY` stream,
//! where `XXXX` is the property id and `YYYY` the type; fixed-size values
//! (integers, booleans, timestamps) live as 16-byte entries inside the
//! storage's `__properties_version1.0` stream. Both are folded into one
//! [`PropertyBag`] with typed getters and explicit absence — a missing or
//! unreadable property is `None`, never an error.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use super::cfb::{CompoundFile, NodeId, ObjectType};

/// Well-known property ids used by the model builder.
pub mod prop {
    pub const SUBJECT: u16 = 0x0037;
    pub const CLIENT_SUBMIT_TIME: u16 = 0x0039;
    pub const SENDER_NAME: u16 = 0x0C1A;
    pub const RECIPIENT_TYPE: u16 = 0x0C15;
    pub const SENDER_EMAIL: u16 = 0x0C1F;
    pub const DISPLAY_CC: u16 = 0x0E03;
    pub const DISPLAY_TO: u16 = 0x0E04;
    pub const MESSAGE_DELIVERY_TIME: u16 = 0x0E06;
    pub const BODY: u16 = 0x1000;
    pub const RTF_COMPRESSED: u16 = 0x1009;
    pub const HTML: u16 = 0x1013;
    pub const DISPLAY_NAME: u16 = 0x3001;
    pub const EMAIL_ADDRESS: u16 = 0x3003;
    pub const ATTACH_DATA: u16 = 0x3701;
    pub const ATTACH_EXTENSION: u16 = 0x3703;
    pub const ATTACH_FILENAME: u16 = 0x3704;
    pub const ATTACH_METHOD: u16 = 0x3705;
    pub const ATTACH_LONG_FILENAME: u16 = 0x3707;
    pub const ATTACH_MIME_TAG: u16 = 0x370E;
    pub const ATTACH_CONTENT_ID: u16 = 0x3712;
    pub const SMTP_ADDRESS: u16 = 0x39FE;
    pub const SENDER_SMTP_ADDRESS: u16 = 0x5D01;
}

/// Property type codes (low word of the tag).
const PT_UNICODE: u16 = 0x001F;
const PT_STRING8: u16 = 0x001E;
const PT_BINARY: u16 = 0x0102;
const PT_OBJECT: u16 = 0x000D;
const PT_LONG: u16 = 0x0003;
const PT_BOOLEAN: u16 = 0x000B;
const PT_SYSTIME: u16 = 0x0040;

const SUBSTG_PREFIX: &str = "__substg1.0_";
const PROPERTIES_STREAM: &str = "__properties_version1.0";

/// Seconds between the FILETIME epoch (1601-01-01) and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// Which storage the properties stream belongs to; the fixed-entry header
/// size differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Top-level message storage (32-byte header).
    Message,
    /// Embedded message storage (24-byte header).
    EmbeddedMessage,
    /// Recipient or attachment storage (8-byte header).
    Sub,
}

impl StorageKind {
    fn header_len(self) -> usize {
        match self {
            Self::Message => 32,
            Self::EmbeddedMessage => 24,
            Self::Sub => 8,
        }
    }
}

/// One decoded property value.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Unicode(String),
    /// 8-bit string, kept raw and decoded on access.
    String8(Vec<u8>),
    Binary(Vec<u8>),
    Time(DateTime<Utc>),
    Int(i32),
    Bool(bool),
    /// An embedded object; the node is the sub-storage carrying it.
    Object(NodeId),
}

/// All properties of one storage, indexed by property id.
#[derive(Debug, Default)]
pub struct PropertyBag {
    values: HashMap<u16, PropertyValue>,
}

impl PropertyBag {
    /// Collect the properties of `storage`.
    ///
    /// Unreadable streams and unknown property types are skipped (logged at
    /// debug level); they surface as absent values.
    pub fn from_storage(cfb: &CompoundFile, storage: NodeId, kind: StorageKind) -> Self {
        let mut values = HashMap::new();

        for child in cfb.children(storage).iter().copied() {
            let entry = cfb.entry(child);
            let Some((id, ptype)) = parse_substg_name(&entry.name) else {
                continue;
            };

            match (entry.object_type, ptype) {
                (ObjectType::Storage, PT_OBJECT) => {
                    values.insert(id, PropertyValue::Object(child));
                }
                (ObjectType::Stream, _) => {
                    let Ok(bytes) = cfb.read_stream(child) else {
                        debug!(name = %entry.name, "unreadable property stream, treating as absent");
                        continue;
                    };
                    match ptype {
                        PT_UNICODE => {
                            values.insert(id, PropertyValue::Unicode(decode_utf16le(&bytes)));
                        }
                        PT_STRING8 => {
                            values.insert(id, PropertyValue::String8(bytes));
                        }
                        PT_BINARY => {
                            values.insert(id, PropertyValue::Binary(bytes));
                        }
                        other => {
                            debug!(name = %entry.name, ptype = other, "skipping property type");
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(stream) = cfb.child_by_name(storage, PROPERTIES_STREAM) {
            if let Ok(bytes) = cfb.read_stream(stream) {
                Self::parse_fixed_entries(&bytes, kind, &mut values);
            }
        }

        Self { values }
    }

    /// Decode the fixed-size entries of a `__properties_version1.0` stream.
    fn parse_fixed_entries(bytes: &[u8], kind: StorageKind, values: &mut HashMap<u16, PropertyValue>) {
        let header = kind.header_len();
        if bytes.len() < header {
            return;
        }
        for entry in bytes[header..].chunks_exact(16) {
            let tag = LittleEndian::read_u32(&entry[0..4]);
            let id = (tag >> 16) as u16;
            let ptype = (tag & 0xFFFF) as u16;
            match ptype {
                PT_LONG => {
                    values.insert(id, PropertyValue::Int(LittleEndian::read_i32(&entry[8..12])));
                }
                PT_BOOLEAN => {
                    values.insert(id, PropertyValue::Bool(entry[8] != 0));
                }
                PT_SYSTIME => {
                    let ticks = LittleEndian::read_u64(&entry[8..16]);
                    if let Some(time) = filetime_to_utc(ticks) {
                        values.insert(id, PropertyValue::Time(time));
                    }
                }
                // Variable-length entries only record the size here; the
                // value already came from its own stream.
                _ => {}
            }
        }
    }

    /// Whether a property is present at all.
    pub fn has(&self, id: u16) -> bool {
        self.values.contains_key(&id)
    }

    /// String value: Unicode as-is, 8-bit strings decoded as UTF-8 with a
    /// windows-1252 fallback. Trailing NULs are stripped.
    pub fn string(&self, id: u16) -> Option<String> {
        match self.values.get(&id)? {
            PropertyValue::Unicode(s) => Some(s.trim_end_matches('\0').to_string()),
            PropertyValue::String8(bytes) => Some(decode_string8(bytes)),
            _ => None,
        }
    }

    /// Binary payload.
    pub fn binary(&self, id: u16) -> Option<&[u8]> {
        match self.values.get(&id)? {
            PropertyValue::Binary(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Timestamp value.
    pub fn time(&self, id: u16) -> Option<DateTime<Utc>> {
        match self.values.get(&id)? {
            PropertyValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// 32-bit integer value.
    pub fn int(&self, id: u16) -> Option<i32> {
        match self.values.get(&id)? {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Embedded-object storage node.
    pub fn object(&self, id: u16) -> Option<NodeId> {
        match self.values.get(&id)? {
            PropertyValue::Object(node) => Some(*node),
            _ => None,
        }
    }
}

/// Split a `__substg1.0_XXXXYYYY` name into (property id, property type).
fn parse_substg_name(name: &str) -> Option<(u16, u16)> {
    let suffix = name.strip_prefix(SUBSTG_PREFIX)?;
    if suffix.len() != 8 {
        return None;
    }
    let tag = u32::from_str_radix(suffix, 16).ok()?;
    Some(((tag >> 16) as u16, (tag & 0xFFFF) as u16))
}

/// Decode UTF-16LE bytes, dropping a dangling trailing byte.
fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Decode an 8-bit string: strict UTF-8 first, windows-1252 otherwise.
fn decode_string8(bytes: &[u8]) -> String {
    let trimmed = match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    };
    match std::str::from_utf8(trimmed) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(trimmed);
            decoded.into_owned()
        }
    }
}

/// Convert a FILETIME tick count (100 ns units since 1601-01-01) to UTC.
/// Zero means "not set".
fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    if ticks == 0 {
        return None;
    }
    let secs = (ticks / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_substg_name() {
        assert_eq!(parse_substg_name("__substg1.0_0037001F"), Some((0x0037, 0x001F)));
        assert_eq!(parse_substg_name("__substg1.0_37010102"), Some((0x3701, 0x0102)));
        assert_eq!(parse_substg_name("__substg1.0_3701000D"), Some((0x3701, 0x000D)));
        assert_eq!(parse_substg_name("__properties_version1.0"), None);
        assert_eq!(parse_substg_name("__substg1.0_xyz"), None);
    }

    #[test]
    fn test_decode_utf16le() {
        let bytes: Vec<u8> = "Héllo"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(decode_utf16le(&bytes), "Héllo");
    }

    #[test]
    fn test_decode_utf16le_strips_nul() {
        let bytes = [b'A', 0, 0, 0];
        assert_eq!(decode_utf16le(&bytes), "A");
    }

    #[test]
    fn test_decode_string8_utf8() {
        assert_eq!(decode_string8(b"plain\0"), "plain");
    }

    #[test]
    fn test_decode_string8_windows_1252() {
        // 0xE9 is 'é' in windows-1252 but invalid standalone UTF-8
        assert_eq!(decode_string8(&[b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn test_filetime_epoch() {
        // 2024-01-01 00:00:00 UTC
        let ticks = (1_704_067_200i64 + FILETIME_UNIX_OFFSET) as u64 * 10_000_000;
        let dt = filetime_to_utc(ticks).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_filetime_zero_is_absent() {
        assert!(filetime_to_utc(0).is_none());
    }

    #[test]
    fn test_fixed_entries_parsing() {
        let mut values = HashMap::new();
        let mut bytes = vec![0u8; 8]; // Sub header
        // PT_LONG entry: tag 0x0C150003, value 2
        let mut entry = vec![0u8; 16];
        entry[0..4].copy_from_slice(&0x0C15_0003u32.to_le_bytes());
        entry[8..12].copy_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&entry);
        PropertyBag::parse_fixed_entries(&bytes, StorageKind::Sub, &mut values);
        let bag = PropertyBag { values };
        assert_eq!(bag.int(prop::RECIPIENT_TYPE), Some(2));
    }
}
