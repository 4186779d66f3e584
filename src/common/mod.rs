// Shared utilities for the container codec and pipelines

pub mod binary;
pub mod hash;

pub use binary::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
pub use hash::{digest_chunk, digest_hex, DIGEST_LEN};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between pipeline stages.
///
/// Cloning is cheap; all clones observe the same flag. Requesting
/// cancellation is sticky - there is no reset.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
