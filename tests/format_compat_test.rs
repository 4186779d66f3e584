//! Older container versions stay readable

mod common;

use std::fs;
use std::io::{Cursor, Write as IoWrite};
use std::path::Path;

use blockimg::common::digest_chunk;
use blockimg::format::{self, IndexEntry};
use blockimg::Reader;
use common::patterned;
use tempfile::TempDir;

/// Build a container with a hand-written v1 or v2 header and one frame per
/// given chunk
fn build_versioned(path: &Path, version: u32, chunk_size: u32, chunks: &[Vec<u8>]) {
    let mut bytes = Cursor::new(Vec::new());
    bytes.get_mut().extend_from_slice(b"IMG1");
    bytes.get_mut().extend_from_slice(&version.to_le_bytes());
    bytes.get_mut().extend_from_slice(&512u32.to_le_bytes());
    bytes.get_mut().extend_from_slice(&chunk_size.to_le_bytes());
    if version >= 2 {
        let device_length: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        bytes.get_mut().extend_from_slice(&device_length.to_le_bytes());
    }
    bytes.set_position(bytes.get_ref().len() as u64);

    let mut entries = Vec::new();
    let mut device_offset = 0u64;
    for (i, chunk) in chunks.iter().enumerate() {
        let compressed = zstd::bulk::compress(chunk, 3).unwrap();
        let digest = digest_chunk(chunk);
        let frame_start = bytes.position();
        format::write_frame(
            &mut bytes,
            i as u32,
            device_offset,
            chunk.len() as u32,
            &digest,
            &compressed,
        )
        .unwrap();
        entries.push(IndexEntry {
            device_offset,
            file_offset: frame_start + 52,
            uncompressed_len: chunk.len() as u32,
            compressed_len: compressed.len() as u32,
        });
        device_offset += chunk.len() as u64;
    }
    format::write_footer(&mut bytes, &entries).unwrap();

    let mut file = fs::File::create(path).unwrap();
    file.write_all(bytes.get_ref()).unwrap();
}

#[test]
fn test_v1_container_derives_device_length_from_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v1.img");
    let chunks = vec![patterned(4096), patterned(4096), patterned(1024)];
    build_versioned(&path, 1, 4096, &chunks);

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.header().version, 1);
    assert_eq!(reader.header().device_length, None);
    assert_eq!(reader.device_length(), 9216);
    assert_eq!(reader.compute_resume_point(), (9216, 3));

    let mut buf = vec![0u8; 9216];
    assert_eq!(reader.read(0, &mut buf).unwrap(), 9216);
    let expected: Vec<u8> = chunks.concat();
    assert_eq!(buf, expected);

    assert!(reader.verify_full(|_, _| {}, 2).unwrap().ok);
}

#[test]
fn test_v2_container_reads_and_verifies() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v2.img");
    let chunks = vec![patterned(8192), patterned(8192)];
    build_versioned(&path, 2, 8192, &chunks);

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.header().version, 2);
    assert_eq!(reader.header().device_length, Some(16384));
    assert_eq!(reader.header().fs_tag, None);

    let mut buf = vec![0u8; 16384];
    reader.read(0, &mut buf).unwrap();
    assert_eq!(buf, chunks.concat());
    assert!(reader.verify_quick(|_, _| {}, 2).unwrap().ok);
}

#[test]
fn test_empty_v1_container_has_zero_length() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v1-empty.img");
    build_versioned(&path, 1, 4096, &[]);

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.device_length(), 0);
    assert_eq!(reader.compute_resume_point(), (0, 0));
}
