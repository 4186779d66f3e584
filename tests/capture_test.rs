//! End-to-end capture and random-access read behavior

mod common;

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use blockimg::{format, BlockReader, CaptureConfig, FileBlockReader, ImageError, Reader, Writer};
use common::{patterned, Lcg, MemBlockReader};
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;

fn capture_full(device: &mut MemBlockReader, path: &Path, chunk_size: u32, workers: usize, depth: usize) {
    let mut writer = Writer::create(path, device.sector_size(), chunk_size, device.total_size(), None).unwrap();
    writer
        .write_from(device, 0, None, |_, _| {}, move || workers, depth)
        .unwrap();
    writer.finish().unwrap();
}

#[test]
fn test_full_capture_of_10mib_device() {
    // 10 MiB device, 4 MiB chunks, two workers, depth two
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let mut device = MemBlockReader::new(patterned(10 * MIB as usize), 512);

    let mut writer = Writer::create(&path, 512, (4 * MIB) as u32, device.total_size(), Some("ext4")).unwrap();
    let (chunks, last_offset) = writer
        .write_from(&mut device, 0, None, |_, _| {}, || 2, 2)
        .unwrap();
    assert_eq!(chunks, 3);
    assert_eq!(last_offset, 10 * MIB);
    let index_start = writer.finish().unwrap();

    // Index has three entries tiling the device
    let mut file = fs::File::open(&path).unwrap();
    let locator = format::read_locator(&mut file).unwrap();
    assert_eq!(locator, index_start);
    let entries = format::read_index(&mut file, locator).unwrap();
    assert_eq!(entries.len(), 3);
    let offsets: Vec<u64> = entries.iter().map(|e| e.device_offset).collect();
    assert_eq!(offsets, vec![0, 4 * MIB, 8 * MIB]);
    let lens: Vec<u32> = entries.iter().map(|e| e.uncompressed_len).collect();
    assert_eq!(lens, vec![(4 * MIB) as u32, (4 * MIB) as u32, (2 * MIB) as u32]);

    // Tail locator sits at the end of the last payload
    let last = entries.last().unwrap();
    assert_eq!(locator, last.file_offset + last.compressed_len as u64);
    let file_len = fs::metadata(&path).unwrap().len();
    assert_eq!(file_len, locator + 4 + 4 + 3 * 24 + 12);

    // Every frame header agrees with its index entry
    for (i, entry) in entries.iter().enumerate() {
        let frame = format::read_frame_header(&mut file, entry.file_offset - 52).unwrap();
        assert_eq!(frame.chunk_index, i as u32);
        assert_eq!(frame.device_offset, entry.device_offset);
        assert_eq!(frame.uncompressed_len, entry.uncompressed_len);
        assert_eq!(frame.compressed_len, entry.compressed_len);
    }

    // Header round-trips
    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.header().fs_tag.as_deref(), Some("ext4"));
    assert_eq!(reader.device_length(), 10 * MIB);
}

#[test]
fn test_reads_match_source_bit_for_bit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let source = patterned(10 * MIB as usize);
    let mut device = MemBlockReader::new(source.clone(), 512);
    capture_full(&mut device, &path, MIB as u32, 3, 2);

    let reader = Reader::open(&path).unwrap();
    let mut rng = Lcg::new(7);
    for _ in 0..200 {
        let offset = rng.next() % (10 * MIB);
        let count = (rng.next() % (128 * 1024) + 1) as usize;
        let mut buf = vec![0u8; count];
        let n = reader.read(offset, &mut buf).unwrap();
        let expected_n = count.min((10 * MIB - offset) as usize);
        assert_eq!(n, expected_n);
        assert_eq!(&buf[..n], &source[offset as usize..offset as usize + n]);
        // Bytes past the device end stay zero
        assert!(buf[n..].iter().all(|&b| b == 0));
    }
}

#[test]
fn test_empty_device_yields_empty_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.img");
    let mut device = MemBlockReader::new(Vec::new(), 512);

    let mut writer = Writer::create(&path, 512, 4096, 0, None).unwrap();
    let (chunks, last_offset) = writer
        .write_from(&mut device, 0, None, |_, _| {}, || 1, 1)
        .unwrap();
    assert_eq!(chunks, 0);
    assert_eq!(last_offset, 0);
    writer.finish().unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.chunk_count(), 0);
    assert_eq!(reader.device_length(), 0);
    let mut buf = vec![0xFFu8; 4096];
    assert_eq!(reader.read(0, &mut buf).unwrap(), 0);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn test_last_chunk_shorter_than_chunk_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.img");
    // 100 KiB device with 64 KiB chunks: last chunk is 36 KiB
    let source = patterned(100 * 1024);
    let mut device = MemBlockReader::new(source.clone(), 512);
    capture_full(&mut device, &path, 64 * 1024, 2, 2);

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.chunk_count(), 2);
    let mut buf = vec![0u8; 100 * 1024];
    assert_eq!(reader.read(0, &mut buf).unwrap(), 100 * 1024);
    assert_eq!(buf, source);
}

#[test]
fn test_progress_reaches_total() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let mut device = MemBlockReader::new(patterned(256 * 1024), 512);

    let mut seen = Vec::new();
    let mut writer = Writer::create(&path, 512, 64 * 1024, device.total_size(), None).unwrap();
    writer
        .write_from(&mut device, 0, None, |current, total| seen.push((current, total)), || 2, 2)
        .unwrap();
    writer.finish().unwrap();

    assert_eq!(seen.len(), 4);
    assert_eq!(seen.last(), Some(&(256 * 1024, 256 * 1024)));
    // Written bytes only ever grow
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_cancel_aborts_capture() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let mut device = MemBlockReader::new(patterned(256 * 1024), 512);

    let mut writer = Writer::create(&path, 512, 64 * 1024, device.total_size(), None).unwrap();
    writer.cancel_handle().request();
    let err = writer
        .write_from(&mut device, 0, None, |_, _| {}, || 2, 2)
        .unwrap_err();
    assert!(matches!(err, ImageError::Cancelled));
}

#[test]
fn test_recapture_of_extracted_stream_is_equivalent() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.img");
    let source = patterned(768 * 1024);
    let mut device = MemBlockReader::new(source.clone(), 512);
    capture_full(&mut device, &first, 256 * 1024, 2, 2);

    // Extract the image through the reader, then capture the extracted
    // stream as if it were a device.
    let reader = Reader::open(&first).unwrap();
    let mut extracted = vec![0u8; source.len()];
    assert_eq!(reader.read(0, &mut extracted).unwrap(), source.len());
    assert_eq!(extracted, source);

    let raw = dir.path().join("extracted.raw");
    fs::write(&raw, &extracted).unwrap();

    let second = dir.path().join("second.img");
    let mut raw_device = FileBlockReader::open(&raw, 512).unwrap();
    let mut writer =
        Writer::create(&second, 512, 256 * 1024, raw_device.total_size(), None).unwrap();
    writer
        .write_from(&mut raw_device, 0, None, |_, _| {}, || 2, 2)
        .unwrap();
    writer.finish().unwrap();

    let second_reader = Reader::open(&second).unwrap();
    assert_eq!(second_reader.chunk_count(), reader.chunk_count());
    let mut again = vec![0u8; source.len()];
    second_reader.read(0, &mut again).unwrap();
    assert_eq!(again, source);
}

#[test]
fn test_capture_with_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("configured.img");
    let source = patterned(512 * 1024);
    let mut device = MemBlockReader::new(source.clone(), 512);

    let config = CaptureConfig { chunk_size: 128 * 1024, ..CaptureConfig::default() };
    let mut writer =
        Writer::create_with(&path, &config, 512, device.total_size(), Some("xfs")).unwrap();
    let (chunks, last_offset) = writer.write_all(&mut device, &config, |_, _| {}).unwrap();
    assert_eq!(chunks, 4);
    assert_eq!(last_offset, 512 * 1024);
    writer.finish().unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.header().chunk_size, 128 * 1024);
    let mut buf = vec![0u8; source.len()];
    reader.read(0, &mut buf).unwrap();
    assert_eq!(buf, source);
}

#[test]
fn test_config_rejects_misaligned_chunk_at_create() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.img");
    let config = CaptureConfig { chunk_size: 100_000, ..CaptureConfig::default() };
    assert!(matches!(
        Writer::create_with(&path, &config, 512, 0, None),
        Err(ImageError::BadHeader(_))
    ));
}

#[test]
fn test_index_invariants_hold() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    let mut device = MemBlockReader::new(patterned(10 * MIB as usize), 512);
    capture_full(&mut device, &path, MIB as u32, 4, 2);

    let mut file = fs::File::open(&path).unwrap();
    let locator = format::read_locator(&mut file).unwrap();
    let entries = format::read_index(&mut file, locator).unwrap();

    // Strictly ascending device offsets, contiguous coverage from zero
    let mut expected_offset = 0u64;
    for entry in &entries {
        assert_eq!(entry.device_offset, expected_offset);
        expected_offset = entry.device_end();
    }
    assert_eq!(expected_offset, 10 * MIB);

    // Payload bytes decode to exactly the recorded length
    for entry in &entries {
        file.seek(SeekFrom::Start(entry.file_offset)).unwrap();
        let mut compressed = vec![0u8; entry.compressed_len as usize];
        file.read_exact(&mut compressed).unwrap();
        let data = zstd::bulk::decompress(&compressed, entry.uncompressed_len as usize).unwrap();
        assert_eq!(data.len(), entry.uncompressed_len as usize);
    }
}
