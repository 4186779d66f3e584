//! Parsing of headers, the tail locator, the index, and frame headers

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::common::binary::{read_bytes, read_u32_le, read_u64_le};
use crate::error::{ImageError, ImageResult};

use super::types::{
    FrameHeader, ImageHeader, IndexEntry, FORMAT_VERSION, HEADER_MAGIC, INDEX_ENTRY_LEN,
    INDEX_MAGIC, MAX_FS_TAG_LEN, TAIL_LEN, TAIL_MAGIC,
};

/// Parse the container header from the start of the stream.
///
/// Accepts versions 1 through 3. v1 carries no device length (callers derive
/// it from the last index entry); v3 adds the filesystem tag.
pub fn read_header<R: Read>(r: &mut R) -> ImageResult<ImageHeader> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != HEADER_MAGIC {
        return Err(ImageError::BadMagic);
    }

    let version = read_u32_le(r)?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    let sector_size = read_u32_le(r)?;
    let chunk_size = read_u32_le(r)?;
    if sector_size == 0 || chunk_size == 0 {
        return Err(ImageError::BadHeader(format!(
            "zero sector size ({}) or chunk size ({})",
            sector_size, chunk_size
        )));
    }

    let device_length = if version >= 2 { Some(read_u64_le(r)?) } else { None };

    let fs_tag = if version >= 3 {
        let tag_len = read_u32_le(r)? as usize;
        if tag_len > MAX_FS_TAG_LEN {
            return Err(ImageError::BadHeader(format!(
                "filesystem tag of {} bytes exceeds the {} byte limit",
                tag_len, MAX_FS_TAG_LEN
            )));
        }
        let raw = read_bytes(r, tag_len)?;
        let tag = String::from_utf8(raw)
            .map_err(|_| ImageError::BadHeader("filesystem tag is not UTF-8".to_string()))?;
        Some(tag)
    } else {
        None
    };

    Ok(ImageHeader { version, sector_size, chunk_size, device_length, fs_tag })
}

/// Read the tail locator from the last 12 bytes of the file.
///
/// Returns the absolute file offset of the index magic.
pub fn read_locator<F: Read + Seek>(f: &mut F) -> ImageResult<u64> {
    let file_len = f.seek(SeekFrom::End(0))?;
    if file_len < TAIL_LEN {
        return Err(ImageError::MissingTail);
    }

    f.seek(SeekFrom::End(-(TAIL_LEN as i64)))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)?;
    if &magic != TAIL_MAGIC {
        return Err(ImageError::MissingTail);
    }

    read_u64_le(f)
}

/// Read and validate the index block at `locator`.
///
/// Entries must be strictly ascending by device offset with no overlap;
/// anything else is corruption.
pub fn read_index<F: Read + Seek>(f: &mut F, locator: u64) -> ImageResult<Vec<IndexEntry>> {
    let file_len = f.seek(SeekFrom::End(0))?;
    if locator + TAIL_LEN > file_len {
        return Err(ImageError::BadIndex(format!(
            "locator {} beyond file end {}",
            locator, file_len
        )));
    }

    f.seek(SeekFrom::Start(locator))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(ImageError::BadIndex("index magic absent at locator".to_string()));
    }

    let count = read_u32_le(f)? as u64;
    let needed = locator + 4 + 4 + count * INDEX_ENTRY_LEN as u64 + TAIL_LEN;
    if needed > file_len {
        return Err(ImageError::BadIndex(format!(
            "{} entries do not fit in {} remaining bytes",
            count,
            file_len.saturating_sub(locator)
        )));
    }

    let mut entries: Vec<IndexEntry> = Vec::with_capacity(count as usize);
    for i in 0..count {
        let entry = IndexEntry {
            device_offset: read_u64_le(f)?,
            file_offset: read_u64_le(f)?,
            uncompressed_len: read_u32_le(f)?,
            compressed_len: read_u32_le(f)?,
        };

        if let Some(prev) = entries.last() {
            if entry.device_offset < prev.device_end() {
                return Err(ImageError::BadIndex(format!(
                    "entry {} at device offset {} overlaps the previous entry ending at {}",
                    i,
                    entry.device_offset,
                    prev.device_end()
                )));
            }
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Read the 52-byte frame header at `offset`.
///
/// A short read here means the frame was cut off mid-header.
pub fn read_frame_header<F: Read + Seek>(f: &mut F, offset: u64) -> ImageResult<FrameHeader> {
    f.seek(SeekFrom::Start(offset))?;

    let mut raw = [0u8; 52];
    f.read_exact(&mut raw).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            ImageError::TruncatedFrame(format!("frame header cut off at file offset {}", offset))
        } else {
            ImageError::Io(e)
        }
    })?;

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&raw[20..52]);

    Ok(FrameHeader {
        chunk_index: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
        device_offset: u64::from_le_bytes([
            raw[4], raw[5], raw[6], raw[7], raw[8], raw[9], raw[10], raw[11],
        ]),
        uncompressed_len: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        compressed_len: u32::from_le_bytes([raw[16], raw[17], raw[18], raw[19]]),
        digest,
    })
}
