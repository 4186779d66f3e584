//! Image container format - codec for the on-disk layout
//!
//! A container is a single append-only file: a fixed header, a run of
//! independently decompressable chunk frames, and a trailing index located
//! by a fixed-size tail.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header                                                       │
//! │   "IMG1" magic, version, sector size, chunk size,            │
//! │   device length (v2+), filesystem tag (v3+)                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Chunk frames (repeated, ascending chunk index)               │
//! │  ┌─────────────────────────────────────────────────────────┐ │
//! │  │ frame header (52 bytes):                                │ │
//! │  │   chunk index, device offset, uncompressed length,      │ │
//! │  │   compressed length, SHA-256 of uncompressed bytes      │ │
//! │  │ payload: one complete zstd frame                        │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index: "IDX1", entry count, 24-byte entries sorted by        │
//! │   device offset (device offset, payload file offset,        │
//! │   uncompressed length, compressed length)                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Tail (last 12 bytes): "TAIL", file offset of "IDX1"          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Device ranges absent from the index are
//! gaps and read back as zeros. Versions 1..=3 are readable; version 3 is
//! written. v1 lacks the device length (derived from the last index entry),
//! v2 adds it, v3 adds the length-prefixed filesystem tag.

mod parser;
mod types;
mod writer;

pub use parser::{read_frame_header, read_header, read_index, read_locator};
pub use types::{
    resume_point, FrameHeader, ImageHeader, IndexEntry, FORMAT_VERSION, FRAME_HEADER_LEN,
    INDEX_ENTRY_LEN, MAX_FS_TAG_LEN, TAIL_LEN,
};
pub use writer::{write_footer, write_frame, write_header};
