// Little-endian wire helpers for the container format
//
// Every multi-byte integer in the container is little-endian regardless of
// host byte order; nothing here relies on native struct layout.

use std::io::{Read, Write};

use crate::error::ImageResult;

/// Read u32 little-endian from the current position
pub fn read_u32_le<R: Read>(r: &mut R) -> ImageResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read u64 little-endian from the current position
pub fn read_u64_le<R: Read>(r: &mut R) -> ImageResult<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read exactly `length` bytes from the current position
pub fn read_bytes<R: Read>(r: &mut R, length: usize) -> ImageResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write u32 little-endian at the current position
pub fn write_u32_le<W: Write>(w: &mut W, value: u32) -> ImageResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Write u64 little-endian at the current position
pub fn write_u64_le<W: Write>(w: &mut W, value: u64) -> ImageResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}
