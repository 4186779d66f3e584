//! Block device abstraction consumed by the capture pipeline
//!
//! The core never opens raw devices itself. The OS layer (or a test double)
//! hands it something implementing [`BlockReader`]: a linear byte address
//! space `[0, total_size)` read in sector-aligned positional chunks, with an
//! optional filesystem allocation map for used-only captures.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{ImageError, ImageResult};

/// Contract between the OS layer and the capture pipeline.
///
/// Implementations may be raw devices, snapshots, plain files, or proxies;
/// the pipeline relies only on these guarantees:
///
/// - `read_at` is positional and may return fewer bytes than requested at
///   end of device; the pipeline never requests more than one chunk at a
///   time.
/// - `try_enumerate_allocated_ranges` reports maximal runs of allocated
///   space in ascending order, coalesced and non-overlapping, or `None`
///   when the underlying filesystem exposes no allocation map.
pub trait BlockReader {
    /// Device byte length
    fn total_size(&self) -> u64;

    /// Minimum alignment unit; reads request multiples of this where possible
    fn sector_size(&self) -> u32;

    /// Positional read at `offset`; returns the number of bytes read
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ImageResult<usize>;

    /// Enumerate allocated ranges as `(offset_bytes, length_bytes)` pairs.
    ///
    /// Returns `Some(total_bytes_emitted)` when the filesystem exposes an
    /// allocation map, `None` otherwise.
    fn try_enumerate_allocated_ranges(
        &mut self,
        _emit: &mut dyn FnMut(u64, u64),
    ) -> ImageResult<Option<u64>> {
        Ok(None)
    }
}

/// A plain file treated as a device image.
///
/// Raw dd-style images are byte-for-byte copies of a disk, so a file handle
/// plus an explicit sector size satisfies the whole contract. Also lets a
/// captured image's extracted stream be re-captured as if it were a device.
pub struct FileBlockReader {
    file: File,
    size: u64,
    sector_size: u32,
}

impl FileBlockReader {
    pub fn open(path: &Path, sector_size: u32) -> ImageResult<Self> {
        if sector_size == 0 {
            return Err(ImageError::BadHeader("sector size must be nonzero".to_string()));
        }
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size, sector_size })
    }
}

impl BlockReader for FileBlockReader {
    fn total_size(&self) -> u64 {
        self.size
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let n = self.file.read(buf)?;
        Ok(n)
    }
}
