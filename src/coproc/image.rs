//! Co-processor program images.
//!
//! An image is a little-endian blob:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `\x7fVXI`                         |
//! | 4      | 2    | format version (1)                      |
//! | 6      | 2    | segment count                           |
//! | 8      | 4    | entry point (local-store address)       |
//! | 12     | 4    | total image length                      |
//! | 16     | 16×n | segment table                           |
//! | …      |      | segment payloads, in table order        |
//!
//! Each segment table entry is `kind: u8` (1 text, 2 data, 3 bss), three
//! reserved bytes, then `lsa`, `file_size` and `mem_size` as `u32`.
//!
//! The entry point addresses a NUL-terminated trampoline record inside a
//! text segment. The record names the native kernel the execution unit runs.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::coproc::local_store::LOCAL_STORE_SIZE;
use crate::error::{OffloadError, Result};

pub const IMAGE_MAGIC: [u8; 4] = *b"\x7fVXI";
pub const IMAGE_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 16;
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Local-store alignment of every segment.
pub const SEGMENT_ALIGNMENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Data,
    Bss,
}

impl SegmentKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(SegmentKind::Text),
            2 => Some(SegmentKind::Data),
            3 => Some(SegmentKind::Bss),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            SegmentKind::Text => 1,
            SegmentKind::Data => 2,
            SegmentKind::Bss => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    kind: SegmentKind,
    lsa: u32,
    mem_size: u32,
    data: Vec<u8>,
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn lsa(&self) -> u32 {
        self.lsa
    }

    pub fn mem_size(&self) -> u32 {
        self.mem_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn end(&self) -> u64 {
        self.lsa as u64 + self.mem_size as u64
    }
}

/// A validated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    entry: u32,
    entry_symbol: String,
    segments: Vec<Segment>,
    len: usize,
}

fn malformed(offset: usize, reason: &'static str) -> OffloadError {
    OffloadError::MalformedImage { offset, reason }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl Image {
    /// Parses and validates an image blob.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(malformed(bytes.len(), "image shorter than its header"));
        }
        if bytes[..4] != IMAGE_MAGIC {
            return Err(malformed(0, "bad magic"));
        }
        if read_u16(bytes, 4) != IMAGE_VERSION {
            return Err(malformed(4, "unsupported format version"));
        }
        let count = read_u16(bytes, 6) as usize;
        if count == 0 {
            return Err(malformed(6, "image has no segments"));
        }
        let entry = read_u32(bytes, 8);
        if read_u32(bytes, 12) as usize != bytes.len() {
            return Err(malformed(12, "length field does not match image size"));
        }

        let table_end = HEADER_SIZE + count * SEGMENT_HEADER_SIZE;
        if bytes.len() < table_end {
            return Err(malformed(bytes.len(), "truncated segment table"));
        }

        let mut segments = Vec::with_capacity(count);
        let mut payload = table_end;
        for index in 0..count {
            let at = HEADER_SIZE + index * SEGMENT_HEADER_SIZE;
            let kind = SegmentKind::from_byte(bytes[at]).ok_or(malformed(at, "unknown segment kind"))?;
            let lsa = read_u32(bytes, at + 4);
            let file_size = read_u32(bytes, at + 8) as usize;
            let mem_size = read_u32(bytes, at + 12);

            if kind == SegmentKind::Bss && file_size != 0 {
                return Err(malformed(at + 8, "bss segment carries a payload"));
            }
            if file_size > mem_size as usize {
                return Err(malformed(at + 8, "file size exceeds memory size"));
            }
            if lsa % SEGMENT_ALIGNMENT != 0 {
                return Err(malformed(at + 4, "segment is not 16-byte aligned"));
            }
            if lsa as u64 + mem_size as u64 > LOCAL_STORE_SIZE as u64 {
                return Err(malformed(at + 12, "segment does not fit in local store"));
            }
            if payload + file_size > bytes.len() {
                return Err(malformed(payload, "truncated segment payload"));
            }

            segments.push(Segment {
                kind,
                lsa,
                mem_size,
                data: bytes[payload..payload + file_size].to_vec(),
            });
            payload += file_size;
        }
        if payload != bytes.len() {
            return Err(malformed(payload, "trailing bytes after last segment"));
        }

        let mut placed: Vec<&Segment> = segments.iter().collect();
        placed.sort_by_key(|s| s.lsa);
        if placed.windows(2).any(|pair| pair[0].end() > pair[1].lsa as u64) {
            return Err(malformed(HEADER_SIZE, "overlapping segments"));
        }

        let entry_symbol = Self::entry_symbol_at(&segments, entry)?;

        Ok(Image {
            entry,
            entry_symbol,
            segments,
            len: bytes.len(),
        })
    }

    fn entry_symbol_at(segments: &[Segment], entry: u32) -> Result<String> {
        let text = segments
            .iter()
            .find(|s| {
                s.kind == SegmentKind::Text
                    && entry >= s.lsa
                    && ((entry - s.lsa) as usize) < s.data.len()
            })
            .ok_or(malformed(8, "entry point outside text"))?;

        let record = &text.data[(entry - text.lsa) as usize..];
        let end = record
            .iter()
            .position(|&b| b == 0)
            .ok_or(malformed(8, "unterminated entry symbol"))?;
        if end == 0 {
            return Err(malformed(8, "empty entry symbol"));
        }
        std::str::from_utf8(&record[..end])
            .map(str::to_owned)
            .map_err(|_| malformed(8, "entry symbol is not UTF-8"))
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Name of the native kernel the entry trampoline points at.
    pub fn entry_symbol(&self) -> &str {
        &self.entry_symbol
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Size of the blob the image was parsed from.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// An imported image. Threads can only be created from an open handle.
pub struct ImageHandle {
    image: Arc<Image>,
    open: bool,
}

impl ImageHandle {
    /// Validates `bytes` and returns an open handle.
    pub fn import(bytes: &[u8]) -> Result<Self> {
        let image = Image::parse(bytes)?;
        debug!(
            entry = image.entry(),
            symbol = image.entry_symbol(),
            segments = image.segments().len(),
            size = image.len(),
            "imported co-processor image"
        );
        Ok(ImageHandle {
            image: Arc::new(image),
            open: true,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn image(&self) -> Result<&Arc<Image>> {
        if self.open {
            Ok(&self.image)
        } else {
            Err(OffloadError::ImageClosed)
        }
    }

    /// Closes the handle. Threads already created keep their copy.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(OffloadError::ImageClosed);
        }
        self.open = false;
        debug!(symbol = self.image.entry_symbol(), "closed co-processor image");
        Ok(())
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("symbol", &self.image.entry_symbol())
            .field("open", &self.open)
            .finish()
    }
}

/// Writes image blobs in the format [`Image::parse`] reads.
///
/// Segments are written in the order they are added. Nothing is validated
/// here, so the builder can also produce malformed images.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    entry: u32,
    segments: Vec<Segment>,
    version: Option<u16>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A text payload holding the trampoline record for `symbol`, NUL-padded
    /// to a multiple of 16 bytes.
    pub fn trampoline(symbol: &str) -> Vec<u8> {
        let mut record = symbol.as_bytes().to_vec();
        record.push(0);
        record.resize(record.len().div_ceil(16) * 16, 0);
        record
    }

    pub fn entry(mut self, lsa: u32) -> Self {
        self.entry = lsa;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = Some(version);
        self
    }

    pub fn text(self, lsa: u32, data: Vec<u8>) -> Self {
        let mem_size = data.len() as u32;
        self.segment(SegmentKind::Text, lsa, mem_size, data)
    }

    pub fn data(self, lsa: u32, data: Vec<u8>) -> Self {
        let mem_size = data.len() as u32;
        self.segment(SegmentKind::Data, lsa, mem_size, data)
    }

    pub fn bss(self, lsa: u32, mem_size: u32) -> Self {
        self.segment(SegmentKind::Bss, lsa, mem_size, Vec::new())
    }

    pub fn segment(mut self, kind: SegmentKind, lsa: u32, mem_size: u32, data: Vec<u8>) -> Self {
        self.segments.push(Segment {
            kind,
            lsa,
            mem_size,
            data,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let payload: usize = self.segments.iter().map(|s| s.data.len()).sum();
        let total = HEADER_SIZE + SEGMENT_HEADER_SIZE * self.segments.len() + payload;

        let mut image = Vec::with_capacity(total);
        image.extend_from_slice(&IMAGE_MAGIC);
        image.extend_from_slice(&self.version.unwrap_or(IMAGE_VERSION).to_le_bytes());
        image.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        image.extend_from_slice(&self.entry.to_le_bytes());
        image.extend_from_slice(&(total as u32).to_le_bytes());

        for segment in &self.segments {
            image.push(segment.kind.to_byte());
            image.extend_from_slice(&[0; 3]);
            image.extend_from_slice(&segment.lsa.to_le_bytes());
            image.extend_from_slice(&(segment.data.len() as u32).to_le_bytes());
            image.extend_from_slice(&segment.mem_size.to_le_bytes());
        }
        for segment in &self.segments {
            image.extend_from_slice(&segment.data);
        }
        image
    }
}
