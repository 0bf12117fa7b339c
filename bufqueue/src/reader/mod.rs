use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::core::{Buffer, SyncQueue};
use super::pipeline::StopToken;

/// Where consumers hand filled buffers. Nothing it does is reported back.
pub trait DataSink: Send + Sync {
    fn process(&self, buffer_id: usize, data: &[u8]);
}

impl<S: DataSink + ?Sized> DataSink for Arc<S> {
    fn process(&self, buffer_id: usize, data: &[u8]) {
        (**self).process(buffer_id, data)
    }
}

/// A closure used as a [`DataSink`]. Build one with [`sink_fn`].
pub struct FnSink<F>(F);

pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(usize, &[u8]) + Send + Sync,
{
    FnSink(f)
}

impl<F> DataSink for FnSink<F>
where
    F: Fn(usize, &[u8]) + Send + Sync,
{
    fn process(&self, buffer_id: usize, data: &[u8]) {
        (self.0)(buffer_id, data)
    }
}

/// Only logs what it was given.
#[derive(Default)]
pub struct PseudoSink;

impl DataSink for PseudoSink {
    fn process(&self, buffer_id: usize, data: &[u8]) {
        debug!(buffer = buffer_id, len = data.len(), "processing buffer");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    /// A buffer of this many valid bytes was processed and recycled.
    Processed(usize),
    /// The full queue stayed empty for a whole timeout.
    Drained,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    pub processed: u64,
    pub bytes: u64,
}

pub struct Consumer {
    id: usize,
    empty: Arc<SyncQueue<Buffer>>,
    full: Arc<SyncQueue<Buffer>>,
    sink: Arc<dyn DataSink>,
    stats: ReaderStats,
}

impl Consumer {
    pub fn new(
        id: usize,
        empty: Arc<SyncQueue<Buffer>>,
        full: Arc<SyncQueue<Buffer>>,
        sink: Arc<dyn DataSink>,
    ) -> Consumer {
        Consumer {
            id,
            empty,
            full,
            sink,
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn step(&mut self) -> ReadStep {
        let mut buffer = match self.full.pop() {
            Ok(buffer) => buffer,
            Err(e) => {
                if !e.is_timeout() {
                    warn!(reader = self.id, "full queue unusable: {}", e);
                }
                return ReadStep::Drained;
            }
        };
        let len = buffer.len();
        trace!(reader = self.id, buffer = buffer.id(), len, "processing buffer");
        self.sink.process(buffer.id(), buffer.as_slice());
        self.stats.processed += 1;
        self.stats.bytes += len as u64;

        buffer.clear();
        if let Err(rejected) = self.empty.push(buffer) {
            warn!(
                reader = self.id,
                buffer = rejected.0.id(),
                "empty queue disabled, dropping buffer"
            );
        }
        ReadStep::Processed(len)
    }

    /// Runs until `token` is stopped or the full queue drains. A drained queue
    /// means no more data is coming, so the reader stops its own token.
    pub fn run(mut self, token: &StopToken) -> ReaderStats {
        debug!(reader = self.id, "reader started");
        while token.is_running() {
            if self.step() == ReadStep::Drained {
                token.stop();
            }
        }
        debug!(reader = self.id, stats = ?self.stats, "reader done");
        self.stats
    }
}
