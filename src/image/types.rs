//! Public result types for the reader and verifier

use std::fmt;

use serde::Serialize;

/// Failure classes a verifier can attribute to a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerifyFaultKind {
    /// Decompressed byte count differs from the recorded length
    LengthMismatch,
    /// SHA-256 over decompressed bytes differs from the stored digest
    DigestMismatch,
    /// Decompressor rejected the frame
    DecodeError,
    /// Frame header or payload shorter than advertised, or frame header
    /// fields disagree with the index entry
    TruncatedFrame,
}

impl fmt::Display for VerifyFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFaultKind::LengthMismatch => write!(f, "length mismatch"),
            VerifyFaultKind::DigestMismatch => write!(f, "digest mismatch"),
            VerifyFaultKind::DecodeError => write!(f, "decode error"),
            VerifyFaultKind::TruncatedFrame => write!(f, "truncated frame"),
        }
    }
}

/// First verification failure found, attributed to its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyFault {
    pub chunk_index: u32,
    pub kind: VerifyFaultKind,
}

/// Outcome of a full or sampled verification pass
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    /// True when every checked chunk passed and the pass was not cancelled
    pub ok: bool,
    /// First failure found, if any
    pub fault: Option<VerifyFault>,
    /// True when the pass was cancelled before completing
    pub cancelled: bool,
}

/// Container summary for tooling and display
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub version: u32,
    pub sector_size: u32,
    pub chunk_size: u32,
    pub device_length: u64,
    pub fs_tag: Option<String>,
    pub chunk_count: u32,
    /// Sum of compressed payload bytes across all frames
    pub compressed_bytes: u64,
    pub file_size: u64,
}
