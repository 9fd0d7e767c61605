//! Streaming block decompression, sequential or bounded-parallel.
//!
//! # Architecture
//!
//! [`BlockStream`] turns a [`BlockReader`] into a lazy sequence of
//! decompressed blocks. Block I/O always happens on the consumer's thread;
//! in parallel mode only the CPU-bound inflate step is handed to workers:
//!
//! 1. Read up to `lookahead` raw blocks from the source
//! 2. Tag each with a sequence number and spawn its decompression on the pool
//! 3. Workers send `(sequence, result)` over a bounded channel
//! 4. Results land in a reorder buffer and are released strictly in sequence
//!
//! # Memory Footprint
//!
//! Bounded regardless of file size: at most `lookahead` compressed blocks
//! in flight plus `lookahead` decompressed blocks waiting for delivery,
//! each at most 64 KB.
//!
//! # Cancellation
//!
//! Every batch of work shares an `AtomicBool`. Seeking, cancelling or
//! dropping the stream raises the flag and drops the receiving end of the
//! channel; workers that have not started skip the inflate, workers that
//! finish late fail to send and exit. Nothing waits on a worker.

use super::block::{decompress_block, BlockDescriptor, BlockReader, RawBlock};
use crate::error::{BamseekError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of blocks decompressed ahead of the consumer.
///
/// Memory budget (8 blocks in flight):
/// - Compressed: 8 × ~64 KB = ~512 KB
/// - Decompressed: 8 × ~64 KB = ~512 KB
pub const PARALLEL_BLOCK_COUNT: usize = 8;

/// How blocks are decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressionMode {
    /// One block at a time on the consumer's thread
    Sequential,
    /// Ahead-of-need on a worker pool, delivered in block order
    Parallel,
}

/// Decompression settings passed explicitly to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Sequential or parallel decompression
    pub mode: DecompressionMode,
    /// Worker threads in the decompression pool (parallel mode)
    pub workers: usize,
    /// Blocks decompressed ahead of the consumer (parallel mode)
    pub lookahead: usize,
}

impl Default for PipelineConfig {
    /// Parallel mode with one worker per available core and
    /// [`PARALLEL_BLOCK_COUNT`] blocks of lookahead.
    fn default() -> Self {
        Self {
            mode: DecompressionMode::Parallel,
            workers: num_cpus::get().max(1),
            lookahead: PARALLEL_BLOCK_COUNT,
        }
    }
}

impl PipelineConfig {
    /// Purely synchronous decompression.
    pub fn sequential() -> Self {
        Self {
            mode: DecompressionMode::Sequential,
            ..Self::default()
        }
    }

    /// Parallel decompression with an explicit worker count.
    pub fn parallel(workers: usize) -> Self {
        Self::default().with_workers(workers)
    }

    /// Set the worker count (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the lookahead window (at least 1).
    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead.max(1);
        self
    }

    /// Build the worker pool this configuration asks for, if any.
    pub fn build_pool(&self) -> Result<Option<Arc<ThreadPool>>> {
        match self.mode {
            DecompressionMode::Sequential => Ok(None),
            DecompressionMode::Parallel => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(self.workers.max(1))
                    .thread_name(|i| format!("bgzf-inflate-{i}"))
                    .build()
                    .map_err(|e| {
                        BamseekError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
                    })?;
                Ok(Some(Arc::new(pool)))
            }
        }
    }
}

/// One block's worth of uncompressed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompressedBlock {
    /// Where the block came from
    pub descriptor: BlockDescriptor,
    /// Decompressed payload
    pub data: Vec<u8>,
}

type WorkerResult = (u64, BlockDescriptor, Result<Vec<u8>>);

/// Work currently owned by the parallel engine.
struct Window {
    pool: Arc<ThreadPool>,
    lookahead: usize,
    cancelled: Arc<AtomicBool>,
    sender: Sender<WorkerResult>,
    receiver: Receiver<WorkerResult>,
    reorder: BTreeMap<u64, (BlockDescriptor, Result<Vec<u8>>)>,
    in_flight: usize,
    next_seq: u64,
    next_deliver: u64,
}

impl Window {
    fn new(pool: Arc<ThreadPool>, lookahead: usize) -> Self {
        let lookahead = lookahead.max(1);
        let (sender, receiver) = bounded(lookahead);
        Self {
            pool,
            lookahead,
            cancelled: Arc::new(AtomicBool::new(false)),
            sender,
            receiver,
            reorder: BTreeMap::new(),
            in_flight: 0,
            next_seq: 0,
            next_deliver: 0,
        }
    }

    fn outstanding(&self) -> usize {
        self.in_flight + self.reorder.len()
    }

    fn has_room(&self) -> bool {
        self.outstanding() < self.lookahead
    }

    fn dispatch(&mut self, block: RawBlock) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight += 1;

        let sender = self.sender.clone();
        let cancelled = Arc::clone(&self.cancelled);
        self.pool.spawn(move || {
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            let result = decompress_block(&block);
            // Receiver is gone once the window was abandoned
            let _ = sender.send((seq, block.descriptor, result));
        });
    }

    /// Next in-order result, blocking until it is ready.
    fn deliver(&mut self) -> Option<(BlockDescriptor, Result<Vec<u8>>)> {
        loop {
            if let Some(ready) = self.reorder.remove(&self.next_deliver) {
                self.next_deliver += 1;
                return Some(ready);
            }
            if self.in_flight == 0 {
                return None;
            }
            match self.receiver.recv() {
                Ok((seq, descriptor, result)) => {
                    self.in_flight -= 1;
                    self.reorder.insert(seq, (descriptor, result));
                }
                // Our own sender keeps the channel open
                Err(_) => return None,
            }
        }
    }

    /// Drop all outstanding work and start a fresh batch.
    fn abandon(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        let (sender, receiver) = bounded(self.lookahead);
        self.sender = sender;
        self.receiver = receiver;
        self.cancelled = Arc::new(AtomicBool::new(false));
        self.reorder.clear();
        self.in_flight = 0;
        self.next_seq = 0;
        self.next_deliver = 0;
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

enum Engine {
    Sequential,
    Parallel(Window),
}

/// Lazy, finite sequence of decompressed blocks.
///
/// Not restartable: a new pass over the archive needs a new stream (or an
/// explicit [`BlockStream::seek`]). The terminal empty block ends the
/// sequence; any framing or inflate error ends it after the error is
/// yielded once.
pub struct BlockStream<R> {
    reader: BlockReader<R>,
    engine: Engine,
    /// Blocks starting at or beyond this file offset are not read
    stop_before: Option<u64>,
    source_done: bool,
    deferred_error: Option<BamseekError>,
    failed: bool,
    cancelled: bool,
}

impl<R: Read> BlockStream<R> {
    /// Sequential stream over a reader positioned at a block boundary.
    pub fn sequential(reader: BlockReader<R>) -> Self {
        Self::with_engine(reader, Engine::Sequential)
    }

    /// Parallel stream decompressing up to `lookahead` blocks ahead on `pool`.
    pub fn parallel(reader: BlockReader<R>, pool: Arc<ThreadPool>, lookahead: usize) -> Self {
        Self::with_engine(reader, Engine::Parallel(Window::new(pool, lookahead)))
    }

    /// Build a stream as `config` describes, reusing `pool` when given.
    pub fn from_config(
        reader: BlockReader<R>,
        config: &PipelineConfig,
        pool: Option<Arc<ThreadPool>>,
    ) -> Result<Self> {
        match config.mode {
            DecompressionMode::Sequential => Ok(Self::sequential(reader)),
            DecompressionMode::Parallel => {
                let pool = match pool {
                    Some(pool) => pool,
                    None => match config.build_pool()? {
                        Some(pool) => pool,
                        None => return Ok(Self::sequential(reader)),
                    },
                };
                Ok(Self::parallel(reader, pool, config.lookahead))
            }
        }
    }

    fn with_engine(reader: BlockReader<R>, engine: Engine) -> Self {
        Self {
            reader,
            engine,
            stop_before: None,
            source_done: false,
            deferred_error: None,
            failed: false,
            cancelled: false,
        }
    }

    /// File offset of the next block the source will read.
    ///
    /// In parallel mode this is ahead of what has been delivered.
    pub fn source_position(&self) -> u64 {
        self.reader.position()
    }

    /// Whether blocks read but not yet delivered are pending.
    pub fn is_idle(&self) -> bool {
        match &self.engine {
            Engine::Sequential => true,
            Engine::Parallel(window) => window.outstanding() == 0,
        }
    }

    /// Stop reading blocks that start at or after `offset` (`None` = no bound).
    pub fn set_stop_before(&mut self, offset: Option<u64>) {
        self.stop_before = offset;
    }

    /// Abandon in-flight work; the stream yields nothing afterwards.
    ///
    /// Returns immediately; workers notice the flag on their own.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        if let Engine::Parallel(window) = &mut self.engine {
            tracing::trace!(outstanding = window.outstanding(), "abandoning in-flight blocks");
            window.abandon();
        }
    }

    /// Whether [`BlockStream::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancel and release the underlying source.
    pub fn close(mut self) {
        self.cancel();
    }

    fn may_read(&self) -> bool {
        !self.source_done
            && self.deferred_error.is_none()
            && self
                .stop_before
                .map_or(true, |stop| self.reader.position() < stop)
    }

    /// Read the next non-terminal raw block, or mark the source done.
    fn read_raw(&mut self) -> Result<Option<RawBlock>> {
        match self.reader.read_block()? {
            Some(block) if !block.descriptor.is_eof() => Ok(Some(block)),
            _ => {
                self.source_done = true;
                Ok(None)
            }
        }
    }

    fn next_sequential(&mut self) -> Option<Result<DecompressedBlock>> {
        if !self.may_read() {
            return None;
        }
        let block = match self.read_raw() {
            Ok(Some(block)) => block,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(decompress_block(&block).map(|data| DecompressedBlock {
            descriptor: block.descriptor,
            data,
        }))
    }

    fn next_parallel(&mut self) -> Option<Result<DecompressedBlock>> {
        // Fill the window with I/O on this thread
        loop {
            let room = match &self.engine {
                Engine::Parallel(window) => window.has_room(),
                Engine::Sequential => false,
            };
            if !room || !self.may_read() {
                break;
            }
            match self.read_raw() {
                Ok(Some(block)) => {
                    if let Engine::Parallel(window) = &mut self.engine {
                        window.dispatch(block);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Delivered after every block read before it
                    self.deferred_error = Some(e);
                    break;
                }
            }
        }

        let ready = match &mut self.engine {
            Engine::Parallel(window) => window.deliver(),
            Engine::Sequential => None,
        };
        match ready {
            Some((descriptor, result)) => {
                Some(result.map(|data| DecompressedBlock { descriptor, data }))
            }
            None => self.deferred_error.take().map(Err),
        }
    }
}

impl<R: Read + Seek> BlockStream<R> {
    /// Discard pending work and continue from the block at `coffset`.
    pub fn seek(&mut self, coffset: u64) -> Result<()> {
        if let Engine::Parallel(window) = &mut self.engine {
            window.abandon();
        }
        self.source_done = false;
        self.deferred_error = None;
        self.reader.seek(coffset)
    }
}

impl<R: Read> Iterator for BlockStream<R> {
    type Item = Result<DecompressedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled || self.failed {
            return None;
        }

        let item = match self.engine {
            Engine::Sequential => self.next_sequential(),
            Engine::Parallel(_) => self.next_parallel(),
        };

        if let Some(Err(_)) = &item {
            self.failed = true;
            if let Engine::Parallel(window) = &mut self.engine {
                window.abandon();
            }
        }
        item
    }
}
