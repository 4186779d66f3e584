//! Capture pipeline - device bytes to container frames
//!
//! One producer reads chunk-sized buffers from a [`crate::device::BlockReader`],
//! a dynamically-sized worker pool hashes and compresses them, and a single
//! writer restores chunk order and appends frames. Bounded queues between the
//! stages are the sole back-pressure mechanism.
//!
//! ```text
//! producer ──▶ [read queue] ──▶ worker pool ──▶ [compressed queue] ──▶ writer
//!                              (hash + zstd)      (out of order)    (reorders)
//! ```

mod pipeline;
mod pool;

pub use pipeline::Writer;

use std::sync::{Arc, Mutex};

use crate::error::ImageError;

/// One chunk-sized read handed to the worker pool
pub(crate) struct ReadChunk {
    pub chunk_index: u32,
    pub device_offset: u64,
    pub data: Vec<u8>,
}

/// A hashed and compressed chunk headed for the ordered writer
pub(crate) struct CompressedChunk {
    pub chunk_index: u32,
    pub device_offset: u64,
    pub uncompressed_len: u32,
    pub digest: [u8; 32],
    pub data: Vec<u8>,
}

/// First-error slot shared by the pipeline stages.
///
/// Every stage records into the same slot; only the first error is kept and
/// surfaced after the stages unwind.
#[derive(Clone, Default)]
pub(crate) struct FirstError(Arc<Mutex<Option<ImageError>>>);

impl FirstError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: ImageError) {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn take(&self) -> Option<ImageError> {
        self.0.lock().unwrap().take()
    }
}
