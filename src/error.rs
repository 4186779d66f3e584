//! Error types shared across the imaging core

use std::fmt;
use std::io;

/// Result type alias for container operations
pub type ImageResult<T> = Result<T, ImageError>;

/// Errors that can occur while writing, reading, or verifying an image
#[derive(Debug)]
pub enum ImageError {
    /// Header magic absent on open
    BadMagic,
    /// Container version newer than this decoder supports
    UnsupportedVersion(u32),
    /// Malformed header fields (e.g. oversized filesystem tag)
    BadHeader(String),
    /// Last 12 bytes of the file do not carry the tail locator
    MissingTail,
    /// Index magic absent at the locator, or index truncated/unsorted
    BadIndex(String),
    /// Frame header or payload shorter than advertised
    TruncatedFrame(String),
    /// Decompressed byte count differs from the recorded length
    LengthMismatch { expected: u64, actual: u64 },
    /// SHA-256 over decompressed bytes differs from the stored digest
    DigestMismatch { chunk_index: u32 },
    /// Decompressor rejected the frame
    DecodeError(String),
    /// Upstream device or file I/O failed
    Io(io::Error),
    /// Caller-requested abort
    Cancelled,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::BadMagic => write!(f, "not an image container (bad magic)"),
            ImageError::UnsupportedVersion(v) => write!(f, "unsupported container version {}", v),
            ImageError::BadHeader(e) => write!(f, "malformed header: {}", e),
            ImageError::MissingTail => write!(f, "missing tail locator"),
            ImageError::BadIndex(e) => write!(f, "malformed index: {}", e),
            ImageError::TruncatedFrame(e) => write!(f, "truncated frame: {}", e),
            ImageError::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {} bytes, got {}", expected, actual)
            }
            ImageError::DigestMismatch { chunk_index } => {
                write!(f, "digest mismatch in chunk {}", chunk_index)
            }
            ImageError::DecodeError(e) => write!(f, "decode error: {}", e),
            ImageError::Io(e) => write!(f, "I/O error: {}", e),
            ImageError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(err: io::Error) -> Self {
        ImageError::Io(err)
    }
}
