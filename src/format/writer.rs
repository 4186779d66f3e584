//! Serialization of headers, frames, and the trailing index

use std::io::{Seek, Write};

use crate::common::binary::{write_u32_le, write_u64_le};
use crate::error::{ImageError, ImageResult};

use super::types::{IndexEntry, FORMAT_VERSION, HEADER_MAGIC, INDEX_MAGIC, MAX_FS_TAG_LEN, TAIL_MAGIC};

/// Write a version-3 header. Called once per file, before any frame.
///
/// Returns the header length in bytes (the file offset of the first frame).
pub fn write_header<W: Write>(
    w: &mut W,
    sector_size: u32,
    chunk_size: u32,
    device_length: u64,
    fs_tag: Option<&str>,
) -> ImageResult<u64> {
    if sector_size == 0 {
        return Err(ImageError::BadHeader("sector size must be nonzero".to_string()));
    }
    if chunk_size == 0 || chunk_size % sector_size != 0 {
        return Err(ImageError::BadHeader(format!(
            "chunk size {} is not a nonzero multiple of sector size {}",
            chunk_size, sector_size
        )));
    }
    let tag = fs_tag.unwrap_or("");
    if tag.len() > MAX_FS_TAG_LEN {
        return Err(ImageError::BadHeader(format!(
            "filesystem tag of {} bytes exceeds the {} byte limit",
            tag.len(),
            MAX_FS_TAG_LEN
        )));
    }

    w.write_all(HEADER_MAGIC)?;
    write_u32_le(w, FORMAT_VERSION)?;
    write_u32_le(w, sector_size)?;
    write_u32_le(w, chunk_size)?;
    write_u64_le(w, device_length)?;
    write_u32_le(w, tag.len() as u32)?;
    w.write_all(tag.as_bytes())?;

    Ok(4 + 4 + 4 + 4 + 8 + 4 + tag.len() as u64)
}

/// Write one chunk frame: 52-byte header followed by the compressed payload
pub fn write_frame<W: Write>(
    w: &mut W,
    chunk_index: u32,
    device_offset: u64,
    uncompressed_len: u32,
    digest: &[u8; 32],
    compressed: &[u8],
) -> ImageResult<()> {
    write_u32_le(w, chunk_index)?;
    write_u64_le(w, device_offset)?;
    write_u32_le(w, uncompressed_len)?;
    write_u32_le(w, compressed.len() as u32)?;
    w.write_all(digest)?;
    w.write_all(compressed)?;
    Ok(())
}

/// Write the trailing index and tail, then flush.
///
/// Returns the absolute file offset of the index magic (the locator value
/// recorded in the tail).
pub fn write_footer<W: Write + Seek>(w: &mut W, entries: &[IndexEntry]) -> ImageResult<u64> {
    let index_start = w.stream_position()?;

    w.write_all(INDEX_MAGIC)?;
    write_u32_le(w, entries.len() as u32)?;
    for entry in entries {
        write_u64_le(w, entry.device_offset)?;
        write_u64_le(w, entry.file_offset)?;
        write_u32_le(w, entry.uncompressed_len)?;
        write_u32_le(w, entry.compressed_len)?;
    }

    w.write_all(TAIL_MAGIC)?;
    write_u64_le(w, index_start)?;
    w.flush()?;

    Ok(index_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::parser::{read_header, read_index, read_locator};
    use std::io::Cursor;

    #[test]
    fn test_header_round_trip() {
        let mut buf = Cursor::new(Vec::new());
        let len = write_header(&mut buf, 512, 4096, 1 << 20, Some("NTFS")).unwrap();
        assert_eq!(len, buf.get_ref().len() as u64);

        buf.set_position(0);
        let header = read_header(&mut buf).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.sector_size, 512);
        assert_eq!(header.chunk_size, 4096);
        assert_eq!(header.device_length, Some(1 << 20));
        assert_eq!(header.fs_tag.as_deref(), Some("NTFS"));
    }

    #[test]
    fn test_header_empty_tag() {
        let mut buf = Cursor::new(Vec::new());
        write_header(&mut buf, 512, 4096, 0, None).unwrap();
        buf.set_position(0);
        let header = read_header(&mut buf).unwrap();
        assert_eq!(header.fs_tag.as_deref(), Some(""));
    }

    #[test]
    fn test_header_rejects_oversized_tag() {
        let tag = "x".repeat(MAX_FS_TAG_LEN + 1);
        let mut buf = Cursor::new(Vec::new());
        let err = write_header(&mut buf, 512, 4096, 0, Some(&tag)).unwrap_err();
        assert!(matches!(err, ImageError::BadHeader(_)));
    }

    #[test]
    fn test_header_rejects_misaligned_chunk() {
        let mut buf = Cursor::new(Vec::new());
        assert!(write_header(&mut buf, 512, 1000, 0, None).is_err());
        assert!(write_header(&mut buf, 0, 4096, 0, None).is_err());
    }

    #[test]
    fn test_footer_round_trip() {
        let entries = vec![
            IndexEntry { device_offset: 0, file_offset: 80, uncompressed_len: 4096, compressed_len: 100 },
            IndexEntry { device_offset: 4096, file_offset: 232, uncompressed_len: 2048, compressed_len: 60 },
        ];

        let mut buf = Cursor::new(vec![0u8; 300]);
        buf.set_position(300);
        let index_start = write_footer(&mut buf, &entries).unwrap();
        assert_eq!(index_start, 300);

        let locator = read_locator(&mut buf).unwrap();
        assert_eq!(locator, 300);
        let parsed = read_index(&mut buf, locator).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_footer_empty_index() {
        let mut buf = Cursor::new(Vec::new());
        let index_start = write_footer(&mut buf, &[]).unwrap();
        assert_eq!(index_start, 0);
        // IDX1 + count + TAIL + locator
        assert_eq!(buf.get_ref().len(), 4 + 4 + 12);

        let locator = read_locator(&mut buf).unwrap();
        assert!(read_index(&mut buf, locator).unwrap().is_empty());
    }
}
