// Chunk digest helpers
//
// The container stores one SHA-256 digest per chunk, computed over the
// uncompressed bytes before compression.

use sha2::{Digest, Sha256};

/// Digest length in bytes as stored in frame headers
pub const DIGEST_LEN: usize = 32;

/// Compute the SHA-256 digest of a chunk's uncompressed bytes
pub fn digest_chunk(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// Render a digest as lowercase hex for logs and diagnostics
pub fn digest_hex(digest: &[u8; DIGEST_LEN]) -> String {
    hex::encode(digest)
}
