//! Type definitions for the container format

use serde::Serialize;

// =============================================================================
// Core Constants
// =============================================================================

pub(crate) const HEADER_MAGIC: &[u8; 4] = b"IMG1";
pub(crate) const INDEX_MAGIC: &[u8; 4] = b"IDX1";
pub(crate) const TAIL_MAGIC: &[u8; 4] = b"TAIL";

/// Container version written by this crate
pub const FORMAT_VERSION: u32 = 3;

/// Frame header size: index + device offset + two lengths + digest
pub const FRAME_HEADER_LEN: u64 = 4 + 8 + 4 + 4 + 32;

/// Tail size: magic + index locator
pub const TAIL_LEN: u64 = 12;

/// Index entry size on the wire
pub const INDEX_ENTRY_LEN: usize = 24;

/// Upper bound on the filesystem tag carried in v3 headers
pub const MAX_FS_TAG_LEN: usize = 65_536;

// =============================================================================
// Parsed Structures
// =============================================================================

/// Parsed container header
#[derive(Debug, Clone, Serialize)]
pub struct ImageHeader {
    pub version: u32,
    /// Bytes per sector of the source device
    pub sector_size: u32,
    /// Target uncompressed bytes per chunk
    pub chunk_size: u32,
    /// Device byte length; absent in v1 containers
    pub device_length: Option<u64>,
    /// Source filesystem tag; absent before v3, may be empty
    pub fs_tag: Option<String>,
}

/// One index entry mapping a device range to its frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    /// Device byte offset this chunk covers
    pub device_offset: u64,
    /// File offset of the payload start (the byte after the frame header)
    pub file_offset: u64,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
}

impl IndexEntry {
    /// Device offset one past the last byte this chunk covers
    pub fn device_end(&self) -> u64 {
        self.device_offset + self.uncompressed_len as u64
    }
}

/// Resume point derived from a parsed index: the device offset one past the
/// last captured chunk and the next chunk index to assign
pub fn resume_point(entries: &[IndexEntry]) -> (u64, u32) {
    match entries.last() {
        Some(last) => (last.device_end(), entries.len() as u32),
        None => (0, 0),
    }
}

/// Parsed 52-byte frame header preceding each payload
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub chunk_index: u32,
    pub device_offset: u64,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
    /// SHA-256 of the uncompressed chunk bytes
    pub digest: [u8; 32],
}
