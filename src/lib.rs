//! blockimg - compressed, verifiable, resumable block-device images
//!
//! Captures images of block devices (whole disks or single volumes) into a
//! purpose-built container and serves random-access reads over those images
//! without extraction. The container stores independently decompressable
//! zstd chunks, each with a SHA-256 digest, plus a trailing index and a
//! fixed-size tail locator.
//!
//! The OS layer supplies the device as a [`device::BlockReader`]; everything
//! else is here:
//!
//! - [`capture::Writer`] streams device bytes through a parallel
//!   hash+compress pipeline into the container, covering the full device or
//!   only filesystem-allocated extents, and can resume a cleanly closed
//!   capture.
//! - [`image::Reader`] opens a finished container for random-access reads
//!   with zero-fill over gaps, and verifies integrity fully or by sampling.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use blockimg::{BlockReader, FileBlockReader, Reader, Writer};
//!
//! # fn main() -> blockimg::ImageResult<()> {
//! let mut device = FileBlockReader::open(Path::new("/evidence/disk.raw"), 512)?;
//! let mut writer = Writer::create(Path::new("disk.img"), 512, 64 << 20,
//!                                 device.total_size(), Some("ext4"))?;
//! writer.write_from(&mut device, 0, None, |_, _| {}, || 4, 2)?;
//! writer.finish()?;
//!
//! let reader = Reader::open(Path::new("disk.img"))?;
//! let mut buf = vec![0u8; 4096];
//! reader.read(0, &mut buf)?;
//! assert!(reader.verify_quick(|_, _| {}, 4)?.ok);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod common;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod image;
pub mod logging;

pub use capture::Writer;
pub use common::CancelToken;
pub use config::CaptureConfig;
pub use device::{BlockReader, FileBlockReader};
pub use error::{ImageError, ImageResult};
pub use image::{ImageInfo, Reader, VerifyFault, VerifyFaultKind, VerifyResult};
