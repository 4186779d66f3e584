//! Ordered capture pipeline and the container `Writer`

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, trace, warn};

use crate::common::CancelToken;
use crate::config::CaptureConfig;
use crate::device::BlockReader;
use crate::error::{ImageError, ImageResult};
use crate::format::{self, IndexEntry, FRAME_HEADER_LEN};

use super::pool::CompressorPool;
use super::{CompressedChunk, FirstError, ReadChunk};

// =============================================================================
// Chunk Plan - which device ranges become which chunks
// =============================================================================

/// Lazy sequence of `(device_offset, length)` chunk assignments.
///
/// Full-range plans tile `[start, end)` with chunk-sized pieces; range plans
/// tile each allocated range separately, so chunks never straddle a range
/// boundary even when the next range begins immediately.
enum ChunkPlan {
    Full { next: u64, end: u64, chunk_size: u64 },
    Ranges { ranges: std::vec::IntoIter<(u64, u64)>, current: Option<(u64, u64)>, chunk_size: u64 },
}

impl ChunkPlan {
    fn full(start: u64, end: u64, chunk_size: u32) -> Self {
        ChunkPlan::Full { next: start, end, chunk_size: chunk_size as u64 }
    }

    fn ranges(ranges: Vec<(u64, u64)>, chunk_size: u32) -> Self {
        ChunkPlan::Ranges {
            ranges: ranges.into_iter(),
            current: None,
            chunk_size: chunk_size as u64,
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = (u64, u32);

    fn next(&mut self) -> Option<(u64, u32)> {
        match self {
            ChunkPlan::Full { next, end, chunk_size } => {
                if *next >= *end {
                    return None;
                }
                let offset = *next;
                let len = (*end - offset).min(*chunk_size);
                *next = offset + len;
                Some((offset, len as u32))
            }
            ChunkPlan::Ranges { ranges, current, chunk_size } => {
                loop {
                    if current.is_none() {
                        *current = ranges.next();
                    }
                    let (offset, remaining) = (*current)?;
                    if remaining == 0 {
                        *current = None;
                        continue;
                    }
                    let len = remaining.min(*chunk_size);
                    *current = Some((offset + len, remaining - len));
                    return Some((offset, len as u32));
                }
            }
        }
    }
}

// =============================================================================
// Writer - capture into a container file
// =============================================================================

/// Appends compressed chunk frames to a container file and writes the
/// trailing index on [`finish`](Writer::finish).
///
/// The file is append-only during capture: the header is written once at
/// creation, frames accumulate in chunk-index order, and the footer lands
/// when the writer is finished. Resuming truncates the previous footer and
/// continues appending; the header is never rewritten.
pub struct Writer {
    file: File,
    /// Byte position where the next frame header will land
    file_pos: u64,
    sector_size: u32,
    chunk_size: u32,
    device_length: u64,
    entries: Vec<IndexEntry>,
    next_index: u32,
    next_device_offset: u64,
    cancel: CancelToken,
}

impl Writer {
    /// Create a fresh container and write its header
    pub fn create(
        path: &Path,
        sector_size: u32,
        chunk_size: u32,
        device_length: u64,
        fs_tag: Option<&str>,
    ) -> ImageResult<Self> {
        let mut file = File::create(path)?;
        let header_len = format::write_header(&mut file, sector_size, chunk_size, device_length, fs_tag)?;
        debug!(?path, sector_size, chunk_size, device_length, "created container");

        Ok(Self {
            file,
            file_pos: header_len,
            sector_size,
            chunk_size,
            device_length,
            entries: Vec::new(),
            next_index: 0,
            next_device_offset: 0,
            cancel: CancelToken::new(),
        })
    }

    /// Create a fresh container using a validated [`CaptureConfig`]
    pub fn create_with(
        path: &Path,
        config: &CaptureConfig,
        sector_size: u32,
        device_length: u64,
        fs_tag: Option<&str>,
    ) -> ImageResult<Self> {
        config.validate(sector_size)?;
        Self::create(path, sector_size, config.chunk_size, device_length, fs_tag)
    }

    /// Reopen a cleanly closed container for continued capture.
    ///
    /// Parses the existing footer read-only, then reopens the file for
    /// writing and truncates away the old index and tail. New frames append
    /// where the index used to start; the footer is rebuilt at the next
    /// [`finish`](Writer::finish).
    pub fn resume(path: &Path) -> ImageResult<Self> {
        // Read-side parse first; the write handle is only opened after this
        // handle is gone.
        let mut probe = File::open(path)?;
        let header = format::read_header(&mut probe)?;
        let locator = format::read_locator(&mut probe)?;
        let entries = format::read_index(&mut probe, locator)?;
        drop(probe);

        let (next_device_offset, next_index) = format::resume_point(&entries);
        let device_length = header
            .device_length
            .unwrap_or_else(|| entries.last().map(|e| e.device_end()).unwrap_or(0));

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.set_len(locator)?;
        file.seek(SeekFrom::End(0))?;

        debug!(
            ?path,
            next_index,
            next_device_offset,
            "resuming container at truncated footer"
        );

        Ok(Self {
            file,
            file_pos: locator,
            sector_size: header.sector_size,
            chunk_size: header.chunk_size,
            device_length,
            entries,
            next_index,
            next_device_offset,
            cancel: CancelToken::new(),
        })
    }

    /// Cloneable handle that aborts an in-flight capture when requested
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn device_length(&self) -> u64 {
        self.device_length
    }

    /// Next chunk index and device offset a subsequent capture would use
    pub fn resume_point(&self) -> (u64, u32) {
        (self.next_device_offset, self.next_index)
    }

    /// Capture `[start_offset, min(device_size, start_offset + max_bytes))`.
    ///
    /// `desired_parallel` is polled once per second by the control monitor;
    /// the pool is resized when its value changes. Returns the number of
    /// chunks written and the device offset one past the captured range.
    pub fn write_from<R, P, D>(
        &mut self,
        reader: &mut R,
        start_offset: u64,
        max_bytes: Option<u64>,
        progress: P,
        desired_parallel: D,
        pipeline_depth: usize,
    ) -> ImageResult<(u32, u64)>
    where
        R: BlockReader,
        P: FnMut(u64, u64) + Send,
        D: Fn() -> usize + Sync,
    {
        if start_offset % self.sector_size as u64 != 0 {
            return Err(ImageError::BadHeader(format!(
                "start offset {} is not sector-aligned",
                start_offset
            )));
        }

        let device_size = reader.total_size();
        let end = match max_bytes {
            Some(cap) => device_size.min(start_offset.saturating_add(cap)),
            None => device_size,
        };
        let start = start_offset.min(end);

        let plan = ChunkPlan::full(start, end, self.chunk_size);
        let chunks = self.run(reader, plan, end - start, progress, &desired_parallel, pipeline_depth)?;
        self.next_device_offset = end;
        Ok((chunks, end))
    }

    /// Capture only the device ranges the filesystem reports as allocated.
    ///
    /// Gaps between allocated ranges are absent from the index and read back
    /// as zeros. Falls back to a full-range capture when the reader exposes
    /// no allocation map, and when resuming (a resumed capture cannot tell
    /// which part of a range was already written).
    ///
    /// Returns the number of chunks written and the uncompressed bytes
    /// captured.
    pub fn write_allocated_only<R, P, D>(
        &mut self,
        reader: &mut R,
        progress: P,
        desired_parallel: D,
        pipeline_depth: usize,
    ) -> ImageResult<(u32, u64)>
    where
        R: BlockReader,
        P: FnMut(u64, u64) + Send,
        D: Fn() -> usize + Sync,
    {
        if self.next_index > 0 {
            warn!("allocated-only capture cannot resume; falling back to full range");
            let resume_from = self.next_device_offset;
            let (chunks, end) =
                self.write_from(reader, resume_from, None, progress, desired_parallel, pipeline_depth)?;
            return Ok((chunks, end - resume_from));
        }

        let mut ranges: Vec<(u64, u64)> = Vec::new();
        let enumerated = reader.try_enumerate_allocated_ranges(&mut |offset, length| {
            ranges.push((offset, length));
        })?;

        match enumerated {
            None => {
                warn!("reader exposes no allocation map; falling back to full range");
                self.write_from(reader, 0, None, progress, desired_parallel, pipeline_depth)
            }
            Some(reported) => {
                let total: u64 = ranges.iter().map(|&(_, len)| len).sum();
                if reported != total {
                    trace!(reported, total, "allocation map total differs from range sum");
                }
                let last_end = ranges.last().map(|&(off, len)| off + len).unwrap_or(0);
                debug!(ranges = ranges.len(), total, "allocated-only capture");

                let plan = ChunkPlan::ranges(ranges, self.chunk_size);
                let chunks = self.run(reader, plan, total, progress, &desired_parallel, pipeline_depth)?;
                self.next_device_offset = last_end;
                Ok((chunks, total))
            }
        }
    }

    /// Capture the whole device with a fixed worker count taken from the
    /// configuration
    pub fn write_all<R, P>(
        &mut self,
        reader: &mut R,
        config: &CaptureConfig,
        progress: P,
    ) -> ImageResult<(u32, u64)>
    where
        R: BlockReader,
        P: FnMut(u64, u64) + Send,
    {
        config.validate(self.sector_size)?;
        let workers = config.parallelism;
        self.write_from(reader, 0, None, progress, move || workers, config.pipeline_depth)
    }

    /// Write the trailing index and tail, flush, and consume the writer.
    ///
    /// Returns the file offset of the index start (the tail locator value).
    pub fn finish(mut self) -> ImageResult<u64> {
        // Drop any partial frame a failed run may have left past the last
        // complete one.
        self.file.set_len(self.file_pos)?;
        self.file.seek(SeekFrom::Start(self.file_pos))?;
        let index_start = format::write_footer(&mut self.file, &self.entries)?;
        self.file.sync_all()?;
        debug!(
            chunks = self.entries.len(),
            index_start, "closed container"
        );
        Ok(index_start)
    }

    /// Stable snapshot of the in-memory index
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    // =========================================================================
    // Pipeline core
    // =========================================================================

    fn run<R, P, D>(
        &mut self,
        reader: &mut R,
        plan: ChunkPlan,
        total_bytes: u64,
        mut progress: P,
        desired_parallel: &D,
        pipeline_depth: usize,
    ) -> ImageResult<u32>
    where
        R: BlockReader,
        P: FnMut(u64, u64) + Send,
        D: Fn() -> usize + Sync,
    {
        let depth = pipeline_depth.clamp(1, 8);
        let workers = desired_parallel().max(1);
        let capacity = (workers * depth).max(2);
        debug!(workers, depth, capacity, total_bytes, "starting capture pipeline");

        let (read_tx, read_rx) = bounded::<ReadChunk>(capacity);
        let (comp_tx, comp_rx) = bounded::<CompressedChunk>(capacity);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let abort = CancelToken::new();
        let errors = FirstError::new();
        let cancel = self.cancel.clone();

        let pool = CompressorPool::start(workers, read_rx, comp_tx, abort.clone(), errors.clone());

        // Disjoint field borrows: the writer thread owns the file and index
        // for the duration of the run.
        let file = &mut self.file;
        let entries = &mut self.entries;
        let start_index = self.next_index;
        let file_pos = self.file_pos;

        let (chunks_written, new_file_pos) = thread::scope(|s| {
            let writer_abort = abort.clone();
            let writer_errors = errors.clone();
            let progress = &mut progress;
            let writer = s.spawn(move || {
                ordered_writer_loop(
                    file,
                    entries,
                    comp_rx,
                    start_index,
                    file_pos,
                    total_bytes,
                    &writer_abort,
                    &writer_errors,
                    progress,
                )
            });

            let pool_ref = &pool;
            let monitor = s.spawn(move || {
                control_monitor_loop(pool_ref, desired_parallel, stop_rx);
            });

            // Producer runs on the calling thread so the reader never has to
            // cross a thread boundary.
            let mut chunk_index = start_index;
            for (offset, len) in plan {
                if cancel.is_set() || abort.is_set() {
                    break;
                }
                let mut data = vec![0u8; len as usize];
                if let Err(err) = read_full(reader, offset, &mut data) {
                    errors.record(err);
                    abort.request();
                    break;
                }
                trace!(chunk_index, offset, len, "read chunk");
                if read_tx
                    .send(ReadChunk { chunk_index, device_offset: offset, data })
                    .is_err()
                {
                    break;
                }
                chunk_index += 1;
            }
            drop(read_tx);

            // Close sequence: stop the monitor, let the workers retire
            // naturally on the drained queue, close the compressed queue,
            // then wait for the writer to finish emitting.
            drop(stop_tx);
            let _ = monitor.join();
            pool.join_workers();
            pool.close_output();

            match writer.join() {
                Ok(result) => result,
                Err(_) => {
                    errors.record(ImageError::Io(io::Error::new(
                        ErrorKind::Other,
                        "writer thread panicked",
                    )));
                    (0, file_pos)
                }
            }
        });

        self.file_pos = new_file_pos;
        self.next_index = start_index + chunks_written;

        if let Some(err) = errors.take() {
            return Err(err);
        }
        if cancel.is_set() {
            return Err(ImageError::Cancelled);
        }
        Ok(chunks_written)
    }
}

/// Drain the compressed queue, restore chunk order, and append frames.
///
/// Out-of-order completions wait in a map keyed by chunk index; a frame is
/// emitted only once every predecessor has been emitted. Returns the number
/// of chunks written and the new end-of-frames file position.
#[allow(clippy::too_many_arguments)]
fn ordered_writer_loop(
    file: &mut File,
    entries: &mut Vec<IndexEntry>,
    rx: Receiver<CompressedChunk>,
    start_index: u32,
    mut file_pos: u64,
    total_bytes: u64,
    abort: &CancelToken,
    errors: &FirstError,
    progress: &mut (dyn FnMut(u64, u64) + Send),
) -> (u32, u64) {
    let mut pending: BTreeMap<u32, CompressedChunk> = BTreeMap::new();
    let mut next = start_index;
    let mut written_bytes = 0u64;

    for item in rx.iter() {
        if abort.is_set() {
            break;
        }
        pending.insert(item.chunk_index, item);

        while let Some(chunk) = pending.remove(&next) {
            if let Err(err) = format::write_frame(
                file,
                chunk.chunk_index,
                chunk.device_offset,
                chunk.uncompressed_len,
                &chunk.digest,
                &chunk.data,
            ) {
                errors.record(err);
                abort.request();
                return (next - start_index, file_pos);
            }

            let payload_offset = file_pos + FRAME_HEADER_LEN;
            entries.push(IndexEntry {
                device_offset: chunk.device_offset,
                file_offset: payload_offset,
                uncompressed_len: chunk.uncompressed_len,
                compressed_len: chunk.data.len() as u32,
            });
            file_pos = payload_offset + chunk.data.len() as u64;
            written_bytes += chunk.uncompressed_len as u64;
            trace!(
                chunk = chunk.chunk_index,
                device_offset = chunk.device_offset,
                compressed = chunk.data.len(),
                "wrote frame"
            );
            progress(written_bytes, total_bytes);
            next += 1;
        }
    }

    (next - start_index, file_pos)
}

/// Poll the desired-parallelism provider at 1 Hz and resize the pool
fn control_monitor_loop<D: Fn() -> usize + Sync + ?Sized>(
    pool: &CompressorPool,
    desired_parallel: &D,
    stop: Receiver<()>,
) {
    loop {
        match stop.recv_timeout(Duration::from_secs(1)) {
            Err(RecvTimeoutError::Timeout) => {
                let want = desired_parallel().max(1);
                if want != pool.degree() {
                    pool.set_degree(want);
                }
            }
            _ => break,
        }
    }
}

/// Fill `buf` completely from the reader starting at `offset`
fn read_full<R: BlockReader>(reader: &mut R, offset: u64, buf: &mut [u8]) -> ImageResult<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = reader.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            return Err(ImageError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("device ended early at offset {}", offset + filled as u64),
            )));
        }
        filled += n;
    }
    Ok(())
}
