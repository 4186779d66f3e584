//! Dynamically-sized hash+compress worker pool
//!
//! Workers drain the read queue, compute the chunk digest, compress with a
//! per-worker zstd context, and publish to the compressed queue. The pool
//! can be resized while running: growing spawns workers, shrinking arms
//! retire tokens that workers consume at the top of their drain loop -
//! retirement is cooperative and never interrupts an item in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};
use zstd::bulk::Compressor;

use crate::common::{digest_chunk, CancelToken};
use crate::config::COMPRESSION_LEVEL;
use crate::error::ImageError;

use super::{CompressedChunk, FirstError, ReadChunk};

pub(crate) struct CompressorPool {
    input: Receiver<ReadChunk>,
    output: Mutex<Option<Sender<CompressedChunk>>>,
    abort: CancelToken,
    errors: FirstError,
    /// Armed retire tokens; a worker that claims one exits its drain loop
    retire: Arc<AtomicUsize>,
    state: Mutex<PoolState>,
    next_worker_id: AtomicUsize,
}

struct PoolState {
    degree: usize,
    handles: Vec<JoinHandle<()>>,
}

impl CompressorPool {
    /// Spawn `degree` workers draining `input` into `output`
    pub fn start(
        degree: usize,
        input: Receiver<ReadChunk>,
        output: Sender<CompressedChunk>,
        abort: CancelToken,
        errors: FirstError,
    ) -> Self {
        let pool = Self {
            input,
            output: Mutex::new(Some(output)),
            abort,
            errors,
            retire: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(PoolState { degree: 0, handles: Vec::new() }),
            next_worker_id: AtomicUsize::new(0),
        };
        pool.set_degree(degree);
        pool
    }

    /// Current target worker count
    pub fn degree(&self) -> usize {
        self.state.lock().unwrap().degree
    }

    /// Resize the pool toward `degree` (clamped to at least 1).
    ///
    /// Growth takes effect immediately; shrinkage takes effect as workers
    /// reach their next loop boundary.
    pub fn set_degree(&self, degree: usize) {
        let degree = degree.max(1);
        let mut state = self.state.lock().unwrap();
        if degree > state.degree {
            let spawn = degree - state.degree;
            debug!(from = state.degree, to = degree, "growing compressor pool");
            for _ in 0..spawn {
                if let Some(handle) = self.spawn_worker() {
                    state.handles.push(handle);
                }
            }
        } else if degree < state.degree {
            let tokens = state.degree - degree;
            debug!(from = state.degree, to = degree, "shrinking compressor pool");
            self.retire.fetch_add(tokens, Ordering::AcqRel);
        }
        state.degree = degree;
    }

    fn spawn_worker(&self) -> Option<JoinHandle<()>> {
        let output = self.output.lock().unwrap().clone()?;
        let input = self.input.clone();
        let abort = self.abort.clone();
        let errors = self.errors.clone();
        let retire = Arc::clone(&self.retire);
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);

        thread::Builder::new()
            .name(format!("compress-{}", id))
            .spawn(move || worker_loop(input, output, abort, errors, retire))
            .ok()
    }

    /// Wait for every worker to exit. Only meaningful after the input
    /// channel has been closed (the producer dropped its sender).
    pub fn join_workers(&self) {
        let handles = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.handles)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Drop the pool's copy of the output sender so the compressed queue
    /// closes once the last worker is gone.
    pub fn close_output(&self) {
        self.output.lock().unwrap().take();
    }
}

fn worker_loop(
    input: Receiver<ReadChunk>,
    output: Sender<CompressedChunk>,
    abort: CancelToken,
    errors: FirstError,
    retire: Arc<AtomicUsize>,
) {
    let mut compressor = match Compressor::new(COMPRESSION_LEVEL) {
        Ok(c) => c,
        Err(err) => {
            errors.record(ImageError::Io(err));
            abort.request();
            // Keep draining so the producer observes the abort instead of
            // blocking on a full queue.
            while input.recv().is_ok() {}
            return;
        }
    };

    loop {
        if take_retire_token(&retire) {
            trace!("worker retiring on token");
            break;
        }

        let chunk = match input.recv() {
            Ok(chunk) => chunk,
            Err(_) => break,
        };
        // After an abort the queue must still drain so the producer never
        // blocks on a full channel; items are received and discarded.
        if abort.is_set() {
            continue;
        }

        let digest = digest_chunk(&chunk.data);
        match compressor.compress(&chunk.data) {
            Ok(data) => {
                let item = CompressedChunk {
                    chunk_index: chunk.chunk_index,
                    device_offset: chunk.device_offset,
                    uncompressed_len: chunk.data.len() as u32,
                    digest,
                    data,
                };
                if output.send(item).is_err() {
                    abort.request();
                }
            }
            Err(err) => {
                errors.record(ImageError::Io(err));
                abort.request();
            }
        }
    }
}

/// Claim one armed retire token, if any
fn take_retire_token(retire: &AtomicUsize) -> bool {
    let mut current = retire.load(Ordering::Acquire);
    while current > 0 {
        match retire.compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
    false
}
