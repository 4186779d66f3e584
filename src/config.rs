//! Capture configuration and tuning constants

use serde::{Deserialize, Serialize};

use crate::error::{ImageError, ImageResult};

/// Fixed zstd compression level for chunk frames.
///
/// Fixed for reproducibility: the same device bytes always produce the same
/// container bytes, which is what makes resumed captures byte-identical to
/// uninterrupted ones.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Default target uncompressed bytes per chunk
pub const DEFAULT_CHUNK_SIZE: u32 = 512 * 1024 * 1024;

/// Chunk size preset for memory-constrained hosts
pub const LOW_MEMORY_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

/// Default capacity of the decompressed-chunk LRU cache
pub const DEFAULT_CACHE_CAPACITY: usize = 4;

/// Default number of in-flight items per worker between pipeline stages
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

/// Default worker count: half the hardware threads, at least one
pub fn default_parallelism() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Tuning knobs for a capture run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Target uncompressed bytes per chunk; must be a nonzero multiple of
    /// the device sector size
    pub chunk_size: u32,
    /// Hash+compress worker count
    pub parallelism: usize,
    /// In-flight items per worker between stages (1..=8)
    pub pipeline_depth: usize,
    /// Decompressed-chunk cache capacity for the reader
    pub cache_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: default_parallelism(),
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CaptureConfig {
    /// Preset with the smaller chunk size for memory-constrained hosts
    pub fn low_memory() -> Self {
        Self {
            chunk_size: LOW_MEMORY_CHUNK_SIZE,
            ..Self::default()
        }
    }

    /// Check the configuration against a device's sector size
    pub fn validate(&self, sector_size: u32) -> ImageResult<()> {
        if sector_size == 0 {
            return Err(ImageError::BadHeader("sector size must be nonzero".to_string()));
        }
        if self.chunk_size == 0 || self.chunk_size % sector_size != 0 {
            return Err(ImageError::BadHeader(format!(
                "chunk size {} is not a nonzero multiple of sector size {}",
                self.chunk_size, sector_size
            )));
        }
        if self.parallelism == 0 {
            return Err(ImageError::BadHeader("parallelism must be at least 1".to_string()));
        }
        if !(1..=8).contains(&self.pipeline_depth) {
            return Err(ImageError::BadHeader(format!(
                "pipeline depth {} outside 1..=8",
                self.pipeline_depth
            )));
        }
        if self.cache_capacity == 0 {
            return Err(ImageError::BadHeader("cache capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}
