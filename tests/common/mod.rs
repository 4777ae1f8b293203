//! Test fixtures: an in-memory compound-file writer and an MSG builder on
//! top of it.
//!
//! Real `.msg` binaries cannot live in the repository as readable fixtures,
//! so the tests construct containers from scratch: version-3 sectors,
//! FAT/DIFAT, a directory with right-linked sibling chains, and a proper
//! mini FAT + mini stream for payloads under the 4096-byte cutoff.

#![allow(dead_code)]

const SECTOR: usize = 512;
const MINI_SECTOR: usize = 64;
const MINI_CUTOFF: usize = 4096;

const FREESECT: u32 = 0xFFFF_FFFF;
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
const FATSECT: u32 = 0xFFFF_FFFD;
const NOSTREAM: u32 = 0xFFFF_FFFF;

struct Node {
    name: String,
    object_type: u8, // 5 root, 1 storage, 2 stream
    children: Vec<usize>,
    data: Vec<u8>,
}

/// Minimal compound-file writer, enough to produce containers the crate's
/// reader accepts.
pub struct CfbWriter {
    nodes: Vec<Node>,
}

impl CfbWriter {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "Root Entry".to_string(),
                object_type: 5,
                children: Vec::new(),
                data: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn add_storage(&mut self, parent: usize, name: &str) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            object_type: 1,
            children: Vec::new(),
            data: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn add_stream(&mut self, parent: usize, name: &str, data: &[u8]) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            object_type: 2,
            children: Vec::new(),
            data: data.to_vec(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn build(&self) -> Vec<u8> {
        // ── mini stream assembly ────────────────────────────────────
        let mut mini_data: Vec<u8> = Vec::new();
        let mut mini_fat: Vec<u32> = Vec::new();
        // node id -> (start sector, lives in mini stream)
        let mut starts: Vec<(u32, bool)> = vec![(ENDOFCHAIN, false); self.nodes.len()];
        let mut large: Vec<usize> = Vec::new();

        for (id, node) in self.nodes.iter().enumerate() {
            if node.object_type != 2 || node.data.is_empty() {
                continue;
            }
            if node.data.len() < MINI_CUTOFF {
                let first = mini_fat.len() as u32;
                let count = node.data.len().div_ceil(MINI_SECTOR);
                for k in 0..count {
                    mini_fat.push(if k + 1 < count {
                        first + k as u32 + 1
                    } else {
                        ENDOFCHAIN
                    });
                }
                mini_data.extend_from_slice(&node.data);
                pad_to(&mut mini_data, MINI_SECTOR);
                starts[id] = (first, true);
            } else {
                large.push(id);
            }
        }

        // ── regular sector budget ───────────────────────────────────
        let dir_sectors = (self.nodes.len() * 128).div_ceil(SECTOR).max(1);
        let mini_fat_sectors = (mini_fat.len() * 4).div_ceil(SECTOR);
        let mini_stream_sectors = mini_data.len().div_ceil(SECTOR);
        let large_sectors: Vec<usize> = large
            .iter()
            .map(|&id| self.nodes[id].data.len().div_ceil(SECTOR))
            .collect();
        let payload =
            dir_sectors + mini_fat_sectors + mini_stream_sectors + large_sectors.iter().sum::<usize>();

        let mut fat_sectors = 1usize;
        loop {
            let needed = (fat_sectors + payload).div_ceil(SECTOR / 4);
            if needed == fat_sectors {
                break;
            }
            fat_sectors = needed;
        }
        assert!(fat_sectors <= 109, "fixture too large for header DIFAT");

        // ── sector id assignment ────────────────────────────────────
        let mut next = 0u32;
        let fat_range: Vec<u32> = (0..fat_sectors as u32).collect();
        next += fat_sectors as u32;
        let dir_start = next;
        next += dir_sectors as u32;
        let mini_fat_start = next;
        next += mini_fat_sectors as u32;
        let mini_stream_start = next;
        next += mini_stream_sectors as u32;

        let mut large_starts: Vec<u32> = Vec::new();
        for &sectors in &large_sectors {
            large_starts.push(next);
            next += sectors as u32;
        }
        let total_sectors = next as usize;

        let mut final_starts = starts;
        for (slot, &id) in large.iter().enumerate() {
            final_starts[id] = (large_starts[slot], false);
        }

        // ── FAT ─────────────────────────────────────────────────────
        let mut fat = vec![FREESECT; fat_sectors * (SECTOR / 4)];
        for &s in &fat_range {
            fat[s as usize] = FATSECT;
        }
        chain(&mut fat, dir_start, dir_sectors);
        chain(&mut fat, mini_fat_start, mini_fat_sectors);
        chain(&mut fat, mini_stream_start, mini_stream_sectors);
        for (slot, &start) in large_starts.iter().enumerate() {
            chain(&mut fat, start, large_sectors[slot]);
        }

        // ── directory entries ───────────────────────────────────────
        let entries_per_sector = SECTOR / 128;
        let entry_count = dir_sectors * entries_per_sector;
        let mut directory = Vec::with_capacity(entry_count * 128);
        for (id, node) in self.nodes.iter().enumerate() {
            let (start, size) = if node.object_type == 5 {
                let start = if mini_stream_sectors > 0 {
                    mini_stream_start
                } else {
                    ENDOFCHAIN
                };
                (start, mini_data.len() as u64)
            } else if node.object_type == 2 {
                (final_starts[id].0, node.data.len() as u64)
            } else {
                (0, 0)
            };
            directory.extend_from_slice(&dir_entry_bytes(node, id, &self.nodes, start, size));
        }
        directory.resize(entry_count * 128, 0);

        // ── header ──────────────────────────────────────────────────
        let mut out = Vec::with_capacity((total_sectors + 1) * SECTOR);
        out.extend_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
        out.extend_from_slice(&[0u8; 16]); // CLSID
        out.extend_from_slice(&0x003Eu16.to_le_bytes()); // minor version
        out.extend_from_slice(&3u16.to_le_bytes()); // major version
        out.extend_from_slice(&0xFFFEu16.to_le_bytes()); // byte order
        out.extend_from_slice(&9u16.to_le_bytes()); // sector shift
        out.extend_from_slice(&6u16.to_le_bytes()); // mini sector shift
        out.extend_from_slice(&[0u8; 6]); // reserved
        out.extend_from_slice(&0u32.to_le_bytes()); // dir sector count (v3)
        out.extend_from_slice(&(fat_sectors as u32).to_le_bytes());
        out.extend_from_slice(&dir_start.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // transaction
        out.extend_from_slice(&(MINI_CUTOFF as u32).to_le_bytes());
        let first_mini_fat = if mini_fat_sectors > 0 {
            mini_fat_start
        } else {
            ENDOFCHAIN
        };
        out.extend_from_slice(&first_mini_fat.to_le_bytes());
        out.extend_from_slice(&(mini_fat_sectors as u32).to_le_bytes());
        out.extend_from_slice(&ENDOFCHAIN.to_le_bytes()); // first DIFAT sector
        out.extend_from_slice(&0u32.to_le_bytes()); // DIFAT sector count
        for i in 0..109 {
            let value = fat_range.get(i).copied().unwrap_or(FREESECT);
            out.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(out.len(), SECTOR);

        // ── sector payloads ─────────────────────────────────────────
        for chunk in fat.chunks(SECTOR / 4) {
            for value in chunk {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out.extend_from_slice(&directory);

        let mut mini_fat_bytes = Vec::with_capacity(mini_fat.len() * 4);
        for value in &mini_fat {
            mini_fat_bytes.extend_from_slice(&value.to_le_bytes());
        }
        pad_to(&mut mini_fat_bytes, SECTOR);
        out.extend_from_slice(&mini_fat_bytes);

        let mut mini_stream_bytes = mini_data;
        pad_to(&mut mini_stream_bytes, SECTOR);
        out.extend_from_slice(&mini_stream_bytes);

        for &id in &large {
            let mut data = self.nodes[id].data.clone();
            pad_to(&mut data, SECTOR);
            out.extend_from_slice(&data);
        }

        assert_eq!(out.len(), (total_sectors + 1) * SECTOR);
        out
    }
}

fn pad_to(buf: &mut Vec<u8>, alignment: usize) {
    let rem = buf.len() % alignment;
    if rem != 0 {
        buf.resize(buf.len() + alignment - rem, 0);
    }
}

fn chain(fat: &mut [u32], start: u32, count: usize) {
    for k in 0..count {
        let sector = start as usize + k;
        fat[sector] = if k + 1 < count {
            start + k as u32 + 1
        } else {
            ENDOFCHAIN
        };
    }
}

/// Serialize one 128-byte directory entry. Siblings are right-linked in
/// insertion order.
fn dir_entry_bytes(node: &Node, id: usize, nodes: &[Node], start: u32, size: u64) -> [u8; 128] {
    let mut raw = [0u8; 128];

    let units: Vec<u16> = node.name.encode_utf16().collect();
    assert!(units.len() <= 31, "directory name too long: {}", node.name);
    for (i, unit) in units.iter().enumerate() {
        raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    raw[64..66].copy_from_slice(&(((units.len() + 1) * 2) as u16).to_le_bytes());
    raw[66] = node.object_type;
    raw[67] = 1; // black

    raw[68..72].copy_from_slice(&NOSTREAM.to_le_bytes()); // left
    raw[72..76].copy_from_slice(&right_sibling(id, nodes).to_le_bytes());
    let child = node
        .children
        .first()
        .map(|&c| c as u32)
        .unwrap_or(NOSTREAM);
    raw[76..80].copy_from_slice(&child.to_le_bytes());

    raw[116..120].copy_from_slice(&start.to_le_bytes());
    raw[120..128].copy_from_slice(&size.to_le_bytes());
    raw
}

fn right_sibling(id: usize, nodes: &[Node]) -> u32 {
    for node in nodes {
        if let Some(pos) = node.children.iter().position(|&c| c == id) {
            return node
                .children
                .get(pos + 1)
                .map(|&c| c as u32)
                .unwrap_or(NOSTREAM);
        }
    }
    NOSTREAM
}

// ── MSG fixture layer ───────────────────────────────────────────────

/// Declarative description of one message fixture.
pub struct MessageSpec {
    pub subject: String,
    pub sender_name: String,
    pub sender_smtp: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// FILETIME ticks for the client submit time.
    pub sent_ticks: Option<u64>,
    pub recipients: Vec<RecipientSpec>,
    pub attachments: Vec<AttachmentSpec>,
}

pub struct RecipientSpec {
    pub name: String,
    pub email: String,
    /// MAPI recipient type: 1 To, 2 Cc, 3 Bcc.
    pub kind: i32,
}

pub struct AttachmentSpec {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
    pub content_id: Option<String>,
    pub embedded: Option<Box<MessageSpec>>,
}

impl MessageSpec {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            sender_name: "Alice Sender".to_string(),
            sender_smtp: "alice@example.com".to_string(),
            body_text: Some("Hello from the fixture.".to_string()),
            body_html: None,
            sent_ticks: Some(FIXED_SENT_TICKS),
            recipients: vec![RecipientSpec {
                name: "Bob Recipient".to_string(),
                email: "bob@example.com".to_string(),
                kind: 1,
            }],
            attachments: Vec::new(),
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.body_html = Some(html.to_string());
        self
    }

    pub fn with_attachment(mut self, att: AttachmentSpec) -> Self {
        self.attachments.push(att);
        self
    }
}

impl AttachmentSpec {
    pub fn file(filename: &str, mime: &str, data: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            mime: mime.to_string(),
            data: data.to_vec(),
            content_id: None,
            embedded: None,
        }
    }

    pub fn inline(mut self, cid: &str) -> Self {
        self.content_id = Some(cid.to_string());
        self
    }
}

/// 2024-03-15 12:00:00 UTC as FILETIME ticks.
pub const FIXED_SENT_TICKS: u64 = (1_710_504_000 + 11_644_473_600) * 10_000_000;

/// Build the container bytes for a message spec.
pub fn build_msg_bytes(spec: &MessageSpec) -> Vec<u8> {
    let mut writer = CfbWriter::new();
    let root = writer.root();
    write_message(&mut writer, root, spec, true);
    writer.build()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn write_message(writer: &mut CfbWriter, storage: usize, spec: &MessageSpec, top_level: bool) {
    writer.add_stream(storage, "__substg1.0_0037001F", &utf16le(&spec.subject));
    writer.add_stream(storage, "__substg1.0_0C1A001F", &utf16le(&spec.sender_name));
    writer.add_stream(storage, "__substg1.0_5D01001F", &utf16le(&spec.sender_smtp));
    if let Some(text) = &spec.body_text {
        writer.add_stream(storage, "__substg1.0_1000001F", &utf16le(text));
    }
    if let Some(html) = &spec.body_html {
        writer.add_stream(storage, "__substg1.0_10130102", html.as_bytes());
    }

    // Fixed-size properties: header (32 bytes top-level, 24 embedded), then
    // 16-byte entries.
    let mut props = vec![0u8; if top_level { 32 } else { 24 }];
    if let Some(ticks) = spec.sent_ticks {
        props.extend_from_slice(&fixed_entry(0x0039_0040, &ticks.to_le_bytes()));
    }
    writer.add_stream(storage, "__properties_version1.0", &props);

    for (i, recipient) in spec.recipients.iter().enumerate() {
        let recip = writer.add_storage(storage, &format!("__recip_version1.0_#{i:08X}"));
        writer.add_stream(recip, "__substg1.0_3001001F", &utf16le(&recipient.name));
        writer.add_stream(recip, "__substg1.0_39FE001F", &utf16le(&recipient.email));
        let mut recip_props = vec![0u8; 8];
        recip_props.extend_from_slice(&fixed_entry(
            0x0C15_0003,
            &i64::from(recipient.kind).to_le_bytes(),
        ));
        writer.add_stream(recip, "__properties_version1.0", &recip_props);
    }

    for (i, attachment) in spec.attachments.iter().enumerate() {
        let attach = writer.add_storage(storage, &format!("__attach_version1.0_#{i:08X}"));
        writer.add_stream(
            attach,
            "__substg1.0_3707001F",
            &utf16le(&attachment.filename),
        );
        if !attachment.mime.is_empty() {
            writer.add_stream(attach, "__substg1.0_370E001F", &utf16le(&attachment.mime));
        }
        if let Some(cid) = &attachment.content_id {
            writer.add_stream(attach, "__substg1.0_3712001F", &utf16le(cid));
        }

        let method: i64 = if attachment.embedded.is_some() { 5 } else { 1 };
        let mut attach_props = vec![0u8; 8];
        attach_props.extend_from_slice(&fixed_entry(0x3705_0003, &method.to_le_bytes()));
        writer.add_stream(attach, "__properties_version1.0", &attach_props);

        if let Some(embedded) = &attachment.embedded {
            let sub = writer.add_storage(attach, "__substg1.0_3701000D");
            write_message(writer, sub, embedded, false);
        } else {
            writer.add_stream(attach, "__substg1.0_37010102", &attachment.data);
        }
    }
}

fn fixed_entry(tag: u32, value: &[u8; 8]) -> [u8; 16] {
    let mut entry = [0u8; 16];
    entry[0..4].copy_from_slice(&tag.to_le_bytes());
    entry[4..8].copy_from_slice(&0x06u32.to_le_bytes()); // readable | writable
    entry[8..16].copy_from_slice(value);
    entry
}

// ── convenience payloads ────────────────────────────────────────────

/// A tiny valid PNG (red 4x4) for image-attachment tests.
pub fn tiny_png() -> Vec<u8> {
    let mut img = image::RgbImage::new(4, 4);
    for pixel in img.pixels_mut() {
        *pixel = image::Rgb([180, 20, 20]);
    }
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
    png
}

/// A small single-page PDF for merge-attachment tests.
pub fn tiny_pdf(text: &str) -> Vec<u8> {
    use msg2pdf::render::engine::{RenderEngine, TextLayoutEngine};
    TextLayoutEngine
        .render_html(&format!("<p>{text}</p>"))
        .unwrap()
}
