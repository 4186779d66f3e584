//! Shared test fixtures: an in-memory block device and patterned data
#![allow(dead_code)]

use blockimg::{BlockReader, ImageResult};

/// In-memory device with an optional filesystem allocation map
pub struct MemBlockReader {
    data: Vec<u8>,
    sector_size: u32,
    allocated: Option<Vec<(u64, u64)>>,
}

impl MemBlockReader {
    pub fn new(data: Vec<u8>, sector_size: u32) -> Self {
        Self { data, sector_size, allocated: None }
    }

    /// Device that reports the given allocated ranges
    pub fn with_allocated(data: Vec<u8>, sector_size: u32, ranges: Vec<(u64, u64)>) -> Self {
        Self { data, sector_size, allocated: Some(ranges) }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl BlockReader for MemBlockReader {
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn try_enumerate_allocated_ranges(
        &mut self,
        emit: &mut dyn FnMut(u64, u64),
    ) -> ImageResult<Option<u64>> {
        match &self.allocated {
            Some(ranges) => {
                let mut total = 0u64;
                for &(offset, length) in ranges {
                    emit(offset, length);
                    total += length;
                }
                Ok(Some(total))
            }
            None => Ok(None),
        }
    }
}

/// Deterministic, mildly compressible device contents
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 64) as u8).wrapping_mul(31) ^ (i as u8 & 0x0F))
        .collect()
}

/// Deterministic pseudo-random sequence for offsets
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 16
    }
}
