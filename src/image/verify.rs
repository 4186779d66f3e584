//! Full and sampled integrity verification
//!
//! Both modes share one predicate per chunk: decompress, check the length
//! against the index entry, check SHA-256 against the digest stored in the
//! frame header. A feeder walks frames in file order and a worker pool
//! checks them; the first failure cancels everything and is reported as
//! `{chunk_index, kind}`.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver};
use rayon::ThreadPoolBuilder;
use tracing::{debug, trace};
use zstd::bulk::Decompressor;

use crate::common::{digest_chunk, digest_hex, CancelToken};
use crate::error::{ImageError, ImageResult};
use crate::format::{self, IndexEntry, FRAME_HEADER_LEN};

use super::handle::Reader;
use super::types::{VerifyFault, VerifyFaultKind, VerifyResult};

impl Reader {
    /// Verify every chunk in the container
    pub fn verify_full<P>(&self, progress: P, parallelism: usize) -> ImageResult<VerifyResult>
    where
        P: FnMut(u64, u64),
    {
        self.verify_full_with_cancel(progress, parallelism, &CancelToken::new())
    }

    /// Verify every chunk, honoring an external cancellation signal
    pub fn verify_full_with_cancel<P>(
        &self,
        progress: P,
        parallelism: usize,
        cancel: &CancelToken,
    ) -> ImageResult<VerifyResult>
    where
        P: FnMut(u64, u64),
    {
        let sample: Vec<usize> = (0..self.chunk_count()).collect();
        verify_sample(self, &sample, progress, parallelism, cancel)
    }

    /// Verify a deterministic sample of chunks: the first, the last, and
    /// every stride-th in between
    pub fn verify_quick<P>(&self, progress: P, parallelism: usize) -> ImageResult<VerifyResult>
    where
        P: FnMut(u64, u64),
    {
        self.verify_quick_with_cancel(progress, parallelism, &CancelToken::new())
    }

    /// Sampled verify, honoring an external cancellation signal
    pub fn verify_quick_with_cancel<P>(
        &self,
        progress: P,
        parallelism: usize,
        cancel: &CancelToken,
    ) -> ImageResult<VerifyResult>
    where
        P: FnMut(u64, u64),
    {
        let sample = sample_indices(self.chunk_count());
        verify_sample(self, &sample, progress, parallelism, cancel)
    }
}

/// Sample set for quick verification: always chunks 0 and N-1, plus every
/// stride-th chunk in between. Stride widens with the chunk count.
fn sample_indices(chunk_count: usize) -> Vec<usize> {
    if chunk_count == 0 {
        return Vec::new();
    }
    let stride = if chunk_count <= 200 {
        10
    } else if chunk_count <= 1000 {
        25
    } else {
        50
    };

    let mut picked = BTreeSet::new();
    picked.insert(0);
    picked.insert(chunk_count - 1);
    let mut k = stride;
    while k + 1 < chunk_count {
        picked.insert(k);
        k += stride;
    }
    picked.into_iter().collect()
}

/// One frame handed to the checking workers
struct VerifyItem {
    chunk_index: u32,
    uncompressed_len: u32,
    digest: [u8; 32],
    compressed: Vec<u8>,
}

/// First-fault slot shared by the checking workers
#[derive(Clone, Default)]
struct FaultSlot(Arc<Mutex<Option<VerifyFault>>>);

impl FaultSlot {
    fn record(&self, chunk_index: u32, kind: VerifyFaultKind) {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(VerifyFault { chunk_index, kind });
        }
    }

    fn take(&self) -> Option<VerifyFault> {
        self.0.lock().unwrap().take()
    }
}

fn verify_sample<P>(
    reader: &Reader,
    sample: &[usize],
    mut progress: P,
    parallelism: usize,
    cancel: &CancelToken,
) -> ImageResult<VerifyResult>
where
    P: FnMut(u64, u64),
{
    let entries = reader.entries();
    let chunk_size = reader.chunk_size();
    let total: u64 = sample.iter().map(|&i| entries[i].compressed_len as u64).sum();
    let workers = parallelism.max(1);
    debug!(
        sampled = sample.len(),
        chunks = entries.len(),
        workers,
        total_compressed = total,
        "starting verification"
    );

    let mut file = File::open(reader.path())?;

    let abort = CancelToken::new();
    let errors = crate::capture::FirstError::new();
    let faults = FaultSlot::default();
    let processed = Arc::new(AtomicU64::new(0));

    let (tx, rx) = bounded::<VerifyItem>((workers * 2).max(2));
    // Workers hold a clone of done_tx until they return; receiving until
    // disconnect is the join barrier.
    let (done_tx, done_rx) = bounded::<()>(0);

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("verify-{}", index))
        .build()
        .map_err(|e| ImageError::Io(std::io::Error::new(ErrorKind::Other, e.to_string())))?;

    for _ in 0..workers {
        let worker_rx = rx.clone();
        let worker_abort = abort.clone();
        let worker_errors = errors.clone();
        let worker_faults = faults.clone();
        let worker_processed = Arc::clone(&processed);
        let worker_done = done_tx.clone();
        pool.spawn(move || {
            verify_worker(worker_rx, worker_abort, worker_errors, worker_faults, worker_processed);
            drop(worker_done);
        });
    }
    drop(rx);
    drop(done_tx);

    // Feed frames in file order on the calling thread
    let mut feed_error: Option<ImageError> = None;
    for &i in sample {
        if abort.is_set() || cancel.is_set() {
            break;
        }
        match load_item(&mut file, entries[i], i as u32, chunk_size) {
            Ok(item) => {
                if tx.send(item).is_err() {
                    break;
                }
            }
            Err(LoadFailure::Fault(kind)) => {
                faults.record(i as u32, kind);
                abort.request();
                break;
            }
            Err(LoadFailure::Io(err)) => {
                feed_error = Some(err);
                abort.request();
                break;
            }
        }
        progress(processed.load(Ordering::Relaxed), total);
    }
    drop(tx);

    // Wait for every worker to finish before reading the shared outcome
    while done_rx.recv().is_ok() {}
    drop(pool);

    if let Some(err) = feed_error {
        return Err(err);
    }
    if let Some(err) = errors.take() {
        return Err(err);
    }
    progress(processed.load(Ordering::Relaxed), total);

    let fault = faults.take();
    let cancelled = cancel.is_set() && fault.is_none();
    Ok(VerifyResult { ok: fault.is_none() && !cancelled, fault, cancelled })
}

enum LoadFailure {
    Fault(VerifyFaultKind),
    Io(ImageError),
}

/// Read one frame (header + payload) and cross-check it against its index
/// entry. Disagreement between the two is corruption.
fn load_item(
    file: &mut File,
    entry: IndexEntry,
    chunk_index: u32,
    chunk_size: u32,
) -> Result<VerifyItem, LoadFailure> {
    if entry.file_offset < FRAME_HEADER_LEN {
        return Err(LoadFailure::Fault(VerifyFaultKind::TruncatedFrame));
    }
    let header_offset = entry.file_offset - FRAME_HEADER_LEN;
    let frame = match format::read_frame_header(file, header_offset) {
        Ok(frame) => frame,
        Err(ImageError::TruncatedFrame(_)) => {
            return Err(LoadFailure::Fault(VerifyFaultKind::TruncatedFrame))
        }
        Err(err) => return Err(LoadFailure::Io(err)),
    };

    if frame.chunk_index != chunk_index
        || frame.device_offset != entry.device_offset
        || frame.uncompressed_len != entry.uncompressed_len
        || frame.compressed_len != entry.compressed_len
    {
        trace!(chunk_index, "frame header disagrees with index entry");
        return Err(LoadFailure::Fault(VerifyFaultKind::TruncatedFrame));
    }

    let limit = chunk_size as u64 * 2;
    if frame.compressed_len as u64 > limit || frame.uncompressed_len as u64 > limit {
        return Err(LoadFailure::Fault(VerifyFaultKind::TruncatedFrame));
    }

    let mut compressed = vec![0u8; frame.compressed_len as usize];
    if let Err(e) = file.read_exact(&mut compressed) {
        return if e.kind() == ErrorKind::UnexpectedEof {
            Err(LoadFailure::Fault(VerifyFaultKind::TruncatedFrame))
        } else {
            Err(LoadFailure::Io(ImageError::Io(e)))
        };
    }

    Ok(VerifyItem {
        chunk_index,
        uncompressed_len: frame.uncompressed_len,
        digest: frame.digest,
        compressed,
    })
}

fn verify_worker(
    rx: Receiver<VerifyItem>,
    abort: CancelToken,
    errors: crate::capture::FirstError,
    faults: FaultSlot,
    processed: Arc<AtomicU64>,
) {
    let mut decompressor = match Decompressor::new() {
        Ok(d) => d,
        Err(err) => {
            errors.record(ImageError::Io(err));
            abort.request();
            return;
        }
    };

    for item in rx.iter() {
        if abort.is_set() {
            break;
        }
        let compressed_len = item.compressed.len() as u64;
        match check_item(&mut decompressor, &item) {
            Ok(()) => {
                processed.fetch_add(compressed_len, Ordering::Relaxed);
            }
            Err(kind) => {
                trace!(
                    chunk = item.chunk_index,
                    %kind,
                    expected = %digest_hex(&item.digest),
                    "chunk failed verification"
                );
                faults.record(item.chunk_index, kind);
                abort.request();
                break;
            }
        }
    }
}

/// The shared predicate: decompress, check length, check digest
fn check_item(decompressor: &mut Decompressor, item: &VerifyItem) -> Result<(), VerifyFaultKind> {
    let data = decompressor
        .decompress(&item.compressed, item.uncompressed_len as usize + 1)
        .map_err(|_| VerifyFaultKind::DecodeError)?;
    if data.len() != item.uncompressed_len as usize {
        return Err(VerifyFaultKind::LengthMismatch);
    }
    if digest_chunk(&data) != item.digest {
        return Err(VerifyFaultKind::DigestMismatch);
    }
    Ok(())
}
