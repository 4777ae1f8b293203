//! Compound File Binary (OLE2) reader.
//!
//! Parses the container into an arena of directory nodes: storages (which
//! nest) and streams (which carry bytes). Pure in-memory parse, no side
//! effects. Tolerant of missing optional streams; structural corruption of
//! the header, FAT or directory is fatal.
//!
//! The sibling pointers in a compound-file directory form a red-black tree
//! per storage. Malformed files can make that tree self-referential, so the
//! arena keeps flat child lists built with cycle-guarded traversal instead
//! of following raw pointers at lookup time.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::{ConvertError, Result};

/// Magic bytes at the start of every compound file.
const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// FAT sentinel: free sector.
const FREESECT: u32 = 0xFFFF_FFFF;
/// FAT sentinel: end of a sector chain.
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
/// Directory sentinel: no sibling/child.
const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Size of one directory entry on disk.
const DIR_ENTRY_SIZE: usize = 128;

/// Index of a node in the arena.
pub type NodeId = usize;

/// What a directory node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// The root storage (node 0).
    Root,
    /// A nested storage (directory).
    Storage,
    /// A byte stream.
    Stream,
    /// A free directory slot, kept in the arena so ids stay stable.
    Free,
}

/// One directory node.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Decoded UTF-16 name. May be empty for free slots.
    pub name: String,
    /// Node kind.
    pub object_type: ObjectType,
    /// Declared stream size in bytes (0 for storages).
    pub size: u64,
    left: u32,
    right: u32,
    child: u32,
    start_sector: u32,
}

/// A parsed compound file: arena of directory nodes plus the sector tables
/// needed to read stream payloads on demand.
#[derive(Debug)]
pub struct CompoundFile {
    data: Vec<u8>,
    sector_size: usize,
    mini_sector_size: usize,
    mini_cutoff: u64,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    mini_stream: Vec<u8>,
    entries: Vec<DirEntry>,
    children: Vec<Vec<NodeId>>,
}

impl CompoundFile {
    /// Parse raw container bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < 512 {
            return Err(ConvertError::malformed(format!(
                "file too small for a container header ({} bytes)",
                data.len()
            )));
        }
        if data[..8] != SIGNATURE {
            return Err(ConvertError::malformed("bad signature"));
        }
        if LittleEndian::read_u16(&data[28..30]) != 0xFFFE {
            return Err(ConvertError::malformed("bad byte-order mark"));
        }

        let major_version = LittleEndian::read_u16(&data[26..28]);
        let sector_shift = LittleEndian::read_u16(&data[30..32]);
        let mini_shift = LittleEndian::read_u16(&data[32..34]);
        match (major_version, sector_shift) {
            (3, 9) | (4, 12) => {}
            _ => {
                return Err(ConvertError::malformed(format!(
                    "unsupported version/sector shift ({major_version}/{sector_shift})"
                )))
            }
        }
        if mini_shift != 6 {
            return Err(ConvertError::malformed(format!(
                "unsupported mini sector shift ({mini_shift})"
            )));
        }

        let sector_size = 1usize << sector_shift;
        let mini_sector_size = 1usize << mini_shift;

        let num_fat_sectors = LittleEndian::read_u32(&data[44..48]);
        let first_dir_sector = LittleEndian::read_u32(&data[48..52]);
        let mini_cutoff = u64::from(LittleEndian::read_u32(&data[56..60]));
        let first_mini_fat = LittleEndian::read_u32(&data[60..64]);
        let num_mini_fat = LittleEndian::read_u32(&data[64..68]);
        let first_difat = LittleEndian::read_u32(&data[68..72]);
        let num_difat = LittleEndian::read_u32(&data[72..76]);

        let mut file = Self {
            data,
            sector_size,
            mini_sector_size,
            mini_cutoff,
            fat: Vec::new(),
            mini_fat: Vec::new(),
            mini_stream: Vec::new(),
            entries: Vec::new(),
            children: Vec::new(),
        };

        let fat_sectors = file.read_difat(num_fat_sectors, first_difat, num_difat)?;
        file.read_fat(&fat_sectors)?;
        file.read_directory(first_dir_sector)?;
        file.read_mini_fat(first_mini_fat, num_mini_fat)?;
        file.materialize_mini_stream()?;
        file.build_children();

        Ok(file)
    }

    /// The root storage node.
    pub fn root(&self) -> NodeId {
        0
    }

    /// Node metadata by id.
    pub fn entry(&self, id: NodeId) -> &DirEntry {
        &self.entries[id]
    }

    /// Direct children of a storage, in directory-tree order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.children[id]
    }

    /// Find a direct child by name (container names compare case-insensitively).
    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children[id]
            .iter()
            .copied()
            .find(|&c| self.entries[c].name.eq_ignore_ascii_case(name))
    }

    /// Direct child storages whose name starts with `prefix`, in tree order.
    pub fn storages_with_prefix<'a>(
        &'a self,
        id: NodeId,
        prefix: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children[id].iter().copied().filter(move |&c| {
            self.entries[c].object_type == ObjectType::Storage
                && self.entries[c].name.starts_with(prefix)
        })
    }

    /// Direct child streams whose name starts with `prefix`, in tree order.
    pub fn streams_with_prefix<'a>(
        &'a self,
        id: NodeId,
        prefix: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children[id].iter().copied().filter(move |&c| {
            self.entries[c].object_type == ObjectType::Stream
                && self.entries[c].name.starts_with(prefix)
        })
    }

    /// Read the full payload of a stream node.
    ///
    /// Streams smaller than the header's mini-stream cutoff live in 64-byte
    /// mini sectors inside the root entry's stream; larger ones use regular
    /// sectors.
    pub fn read_stream(&self, id: NodeId) -> Result<Vec<u8>> {
        let entry = &self.entries[id];
        if entry.object_type != ObjectType::Stream {
            return Err(ConvertError::malformed(format!(
                "'{}' is not a stream",
                entry.name
            )));
        }
        let size = entry.size as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        if entry.size < self.mini_cutoff {
            self.read_mini_chain(entry.start_sector, size)
        } else {
            self.read_chain(entry.start_sector, size)
        }
    }

    // ── header tables ───────────────────────────────────────────────

    /// Collect the FAT sector locations: 109 slots in the header, then the
    /// chained DIFAT sectors.
    fn read_difat(
        &self,
        num_fat_sectors: u32,
        first_difat: u32,
        num_difat: u32,
    ) -> Result<Vec<u32>> {
        let mut locations = Vec::with_capacity(num_fat_sectors as usize);
        for i in 0..109 {
            let loc = LittleEndian::read_u32(&self.data[76 + i * 4..80 + i * 4]);
            if loc != FREESECT {
                locations.push(loc);
            }
        }

        let mut sector = first_difat;
        let mut walked = 0u32;
        while sector != ENDOFCHAIN && sector != FREESECT {
            if walked >= num_difat || walked > self.max_sector_count() {
                return Err(ConvertError::malformed("DIFAT chain does not terminate"));
            }
            let bytes = self.sector(sector)?;
            let slots = self.sector_size / 4 - 1;
            for i in 0..slots {
                let loc = LittleEndian::read_u32(&bytes[i * 4..i * 4 + 4]);
                if loc != FREESECT {
                    locations.push(loc);
                }
            }
            sector = LittleEndian::read_u32(&bytes[self.sector_size - 4..]);
            walked += 1;
        }

        Ok(locations)
    }

    fn read_fat(&mut self, fat_sectors: &[u32]) -> Result<()> {
        let mut fat = Vec::with_capacity(fat_sectors.len() * (self.sector_size / 4));
        for &loc in fat_sectors {
            let bytes = self.sector(loc)?;
            for chunk in bytes.chunks_exact(4) {
                fat.push(LittleEndian::read_u32(chunk));
            }
        }
        if fat.is_empty() {
            return Err(ConvertError::malformed("container has no FAT"));
        }
        self.fat = fat;
        Ok(())
    }

    fn read_mini_fat(&mut self, first: u32, count: u32) -> Result<()> {
        if first == ENDOFCHAIN || first == FREESECT || count == 0 {
            return Ok(());
        }
        let bytes = self.read_fat_chain(first, count as usize * self.sector_size)?;
        self.mini_fat = bytes
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect();
        Ok(())
    }

    /// The root entry's stream holds the backing bytes for all mini sectors.
    fn materialize_mini_stream(&mut self) -> Result<()> {
        let root = &self.entries[0];
        if root.size == 0 || root.start_sector == ENDOFCHAIN {
            return Ok(());
        }
        let start = root.start_sector;
        let size = root.size as usize;
        self.mini_stream = self.read_chain(start, size)?;
        Ok(())
    }

    // ── directory ───────────────────────────────────────────────────

    fn read_directory(&mut self, first_dir_sector: u32) -> Result<()> {
        // Directory sector count is not recorded for version 3, so walk the
        // chain until ENDOFCHAIN with the usual cycle guard.
        let bytes = self.read_fat_chain(first_dir_sector, usize::MAX)?;

        let mut entries = Vec::with_capacity(bytes.len() / DIR_ENTRY_SIZE);
        for raw in bytes.chunks_exact(DIR_ENTRY_SIZE) {
            entries.push(Self::parse_dir_entry(raw));
        }

        match entries.first() {
            Some(root) if root.object_type == ObjectType::Root => {}
            _ => {
                return Err(ConvertError::malformed(
                    "directory has no root entry",
                ))
            }
        }

        self.entries = entries;
        Ok(())
    }

    fn parse_dir_entry(raw: &[u8]) -> DirEntry {
        let name_len = LittleEndian::read_u16(&raw[64..66]) as usize;
        let name = if (2..=64).contains(&name_len) {
            let units: Vec<u16> = raw[..name_len - 2]
                .chunks_exact(2)
                .map(LittleEndian::read_u16)
                .collect();
            String::from_utf16_lossy(&units)
        } else {
            String::new()
        };

        let object_type = match raw[66] {
            1 => ObjectType::Storage,
            2 => ObjectType::Stream,
            5 => ObjectType::Root,
            _ => ObjectType::Free,
        };

        DirEntry {
            name,
            object_type,
            left: LittleEndian::read_u32(&raw[68..72]),
            right: LittleEndian::read_u32(&raw[72..76]),
            child: LittleEndian::read_u32(&raw[76..80]),
            start_sector: LittleEndian::read_u32(&raw[116..120]),
            // Version 3 writers may leave garbage in the high half.
            size: LittleEndian::read_u64(&raw[120..128]) & 0xFFFF_FFFF,
        }
    }

    /// Flatten each storage's sibling tree into an ordered child list.
    ///
    /// In-order traversal yields the tree's name order. A visited bitmap
    /// breaks cycles in malformed files; out-of-range ids are dropped with a
    /// warning rather than failing the whole parse.
    fn build_children(&mut self) {
        let n = self.entries.len();
        let mut children = vec![Vec::new(); n];

        for id in 0..n {
            match self.entries[id].object_type {
                ObjectType::Root | ObjectType::Storage => {}
                _ => continue,
            }
            children[id] = self.collect_siblings(self.entries[id].child);
        }

        self.children = children;
    }

    fn collect_siblings(&self, first: u32) -> Vec<NodeId> {
        let n = self.entries.len();
        let mut out = Vec::new();
        let mut visited = vec![false; n];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut cursor = first;

        loop {
            while cursor != NOSTREAM {
                let id = cursor as usize;
                if id >= n {
                    warn!(node = cursor, "directory sibling id out of range, skipping");
                    break;
                }
                if visited[id] {
                    warn!(node = cursor, "directory sibling cycle detected, breaking");
                    break;
                }
                visited[id] = true;
                stack.push(id);
                cursor = self.entries[id].left;
            }

            let Some(id) = stack.pop() else {
                break;
            };
            if self.entries[id].object_type != ObjectType::Free {
                out.push(id);
            }
            cursor = self.entries[id].right;
        }

        out
    }

    // ── sector chains ───────────────────────────────────────────────

    fn max_sector_count(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }

    /// Raw bytes of one regular sector. The final sector of a non-aligned
    /// file is returned short.
    fn sector(&self, index: u32) -> Result<&[u8]> {
        let offset = (index as usize + 1) * self.sector_size;
        if offset >= self.data.len() {
            return Err(ConvertError::malformed(format!(
                "sector {index} beyond end of file"
            )));
        }
        let end = (offset + self.sector_size).min(self.data.len());
        Ok(&self.data[offset..end])
    }

    /// Read up to `size` bytes by following a FAT chain.
    fn read_fat_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut sector = start;
        let mut steps = 0usize;

        while sector != ENDOFCHAIN && sector != FREESECT && out.len() < size {
            if steps > self.fat.len() {
                return Err(ConvertError::malformed("sector chain does not terminate"));
            }
            out.extend_from_slice(self.sector(sector)?);
            sector = *self
                .fat
                .get(sector as usize)
                .ok_or_else(|| ConvertError::malformed(format!("sector {sector} not in FAT")))?;
            steps += 1;
        }

        out.truncate(size.min(out.len()));
        Ok(out)
    }

    fn read_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let bytes = self.read_fat_chain(start, size)?;
        if bytes.len() < size {
            return Err(ConvertError::malformed(format!(
                "stream truncated ({} of {size} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn read_mini_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size);
        let mut sector = start;
        let mut steps = 0usize;

        while sector != ENDOFCHAIN && sector != FREESECT && out.len() < size {
            if steps > self.mini_fat.len() {
                return Err(ConvertError::malformed(
                    "mini sector chain does not terminate",
                ));
            }
            let offset = sector as usize * self.mini_sector_size;
            if offset >= self.mini_stream.len() {
                return Err(ConvertError::malformed(format!(
                    "mini sector {sector} beyond mini stream"
                )));
            }
            let end = (offset + self.mini_sector_size).min(self.mini_stream.len());
            out.extend_from_slice(&self.mini_stream[offset..end]);
            sector = *self.mini_fat.get(sector as usize).ok_or_else(|| {
                ConvertError::malformed(format!("mini sector {sector} not in mini FAT"))
            })?;
            steps += 1;
        }

        if out.len() < size {
            return Err(ConvertError::malformed(format!(
                "mini stream truncated ({} of {size} bytes)",
                out.len()
            )));
        }
        out.truncate(size);
        Ok(out)
    }
}
