//! Random-access reader over a closed container

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::config::DEFAULT_CACHE_CAPACITY;
use crate::error::{ImageError, ImageResult};
use crate::format::{self, ImageHeader, IndexEntry};

use super::cache::ChunkCache;
use super::types::ImageInfo;

/// Read-only handle over a container with a valid footer.
///
/// Serves random-access reads of the original device bytes without
/// extraction: unmapped ranges (gaps and everything past the device end)
/// read as zeros, mapped ranges are served from an LRU cache of decompressed
/// chunks. `read` takes `&self`, so one handle can serve many threads; cache
/// and file access serialize on an internal lock.
pub struct Reader {
    path: PathBuf,
    header: ImageHeader,
    entries: Vec<IndexEntry>,
    device_length: u64,
    file_size: u64,
    inner: Mutex<ReaderInner>,
}

struct ReaderInner {
    file: File,
    cache: ChunkCache,
}

impl Reader {
    /// Open a container, parsing header, locator, and index
    pub fn open(path: &Path) -> ImageResult<Self> {
        Self::open_with_cache(path, DEFAULT_CACHE_CAPACITY)
    }

    /// Open with an explicit decompressed-chunk cache capacity
    pub fn open_with_cache(path: &Path, cache_capacity: usize) -> ImageResult<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let header = format::read_header(&mut file)?;
        let locator = format::read_locator(&mut file)?;
        let entries = format::read_index(&mut file, locator)?;

        // v1 containers carry no device length; the last entry bounds it.
        let device_length = header
            .device_length
            .unwrap_or_else(|| entries.last().map(|e| e.device_end()).unwrap_or(0));

        debug!(
            ?path,
            version = header.version,
            chunks = entries.len(),
            device_length,
            "opened container"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            entries,
            device_length,
            file_size,
            inner: Mutex::new(ReaderInner { file, cache: ChunkCache::new(cache_capacity) }),
        })
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn device_length(&self) -> u64 {
        self.device_length
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub(crate) fn chunk_size(&self) -> u32 {
        self.header.chunk_size
    }

    /// Container summary for tooling and display
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            version: self.header.version,
            sector_size: self.header.sector_size,
            chunk_size: self.header.chunk_size,
            device_length: self.device_length,
            fs_tag: self.header.fs_tag.clone(),
            chunk_count: self.entries.len() as u32,
            compressed_bytes: self.entries.iter().map(|e| e.compressed_len as u64).sum(),
            file_size: self.file_size,
        }
    }

    /// Where a resumed capture would continue: the device offset one past
    /// the last captured chunk and the next chunk index
    pub fn compute_resume_point(&self) -> (u64, u32) {
        format::resume_point(&self.entries)
    }

    /// Read device bytes starting at `device_offset` into `buf`.
    ///
    /// The whole buffer is pre-zeroed, so gaps and bytes past the device end
    /// come back as zeros. Returns the effective byte count
    /// `min(buf.len(), device_length - device_offset)`; bytes past the
    /// device end are not counted.
    pub fn read(&self, device_offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        buf.fill(0);
        if buf.is_empty() || device_offset >= self.device_length {
            return Ok(0);
        }

        let mut remaining = (buf.len() as u64).min(self.device_length - device_offset);
        let effective = remaining as usize;
        let mut offset = device_offset;
        let mut pos = 0usize;

        while remaining > 0 {
            match self.locate(offset) {
                Some(i) => {
                    let entry = self.entries[i];
                    let within = (offset - entry.device_offset) as usize;
                    let take = remaining.min(entry.uncompressed_len as u64 - within as u64) as usize;
                    let chunk = self.fetch_chunk(i)?;
                    buf[pos..pos + take].copy_from_slice(&chunk[within..within + take]);
                    pos += take;
                    offset += take as u64;
                    remaining -= take as u64;
                }
                None => {
                    // Gap: the buffer slice stays zero up to the next entry
                    let next = self.entries.partition_point(|e| e.device_offset <= offset);
                    let skip = if next < self.entries.len() {
                        remaining.min(self.entries[next].device_offset - offset)
                    } else {
                        remaining
                    };
                    pos += skip as usize;
                    offset += skip;
                    remaining -= skip;
                }
            }
        }

        Ok(effective)
    }

    /// Binary-search the index for the entry covering `device_offset`
    fn locate(&self, device_offset: u64) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.device_offset <= device_offset);
        if idx > 0 {
            let candidate = &self.entries[idx - 1];
            if device_offset < candidate.device_end() {
                return Some(idx - 1);
            }
        }
        None
    }

    /// Fetch a decompressed chunk through the cache
    fn fetch_chunk(&self, entry_index: usize) -> ImageResult<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(data) = inner.cache.get(entry_index) {
            trace!(entry_index, "chunk cache hit");
            return Ok(data);
        }

        let entry = self.entries[entry_index];
        let limit = self.header.chunk_size as u64 * 2;
        if entry.compressed_len as u64 > limit || entry.uncompressed_len as u64 > limit {
            return Err(ImageError::TruncatedFrame(format!(
                "chunk {} lengths ({}/{}) exceed twice the chunk size",
                entry_index, entry.compressed_len, entry.uncompressed_len
            )));
        }

        trace!(entry_index, file_offset = entry.file_offset, "chunk cache miss, loading");
        inner.file.seek(SeekFrom::Start(entry.file_offset))?;
        let mut compressed = vec![0u8; entry.compressed_len as usize];
        inner.file.read_exact(&mut compressed).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                ImageError::TruncatedFrame(format!(
                    "chunk {} payload cut off at file offset {}",
                    entry_index, entry.file_offset
                ))
            } else {
                ImageError::Io(e)
            }
        })?;

        let data = zstd::bulk::decompress(&compressed, entry.uncompressed_len as usize + 1)
            .map_err(|e| ImageError::DecodeError(format!("chunk {}: {}", entry_index, e)))?;
        if data.len() != entry.uncompressed_len as usize {
            return Err(ImageError::LengthMismatch {
                expected: entry.uncompressed_len as u64,
                actual: data.len() as u64,
            });
        }

        let data = Arc::new(data);
        inner.cache.insert(entry_index, Arc::clone(&data));
        trace!(entry_index, resident = inner.cache.len(), "chunk cached");
        Ok(data)
    }
}
