//! Wiring of the two buffer queues to producer and consumer threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{Buffer, SyncQueue};
use crate::errors::{PipelineError, SourceError};
use crate::reader::DataSink;
use crate::writer::DataSource;

mod controller;

pub use controller::{start, PipelineReport, RunningPipeline};

/// Cooperative cancellation flag handed to each worker when it is spawned.
#[derive(Clone, Debug)]
pub struct StopToken {
    running: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> StopToken {
        StopToken {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for StopToken {
    fn default() -> Self {
        StopToken::new()
    }
}

/// Puts a source or sink that is not reentrant behind a mutex.
pub struct Serialized<T> {
    inner: Mutex<T>,
}

impl<T> Serialized<T> {
    pub fn new(inner: T) -> Serialized<T> {
        Serialized {
            inner: Mutex::new(inner),
        }
    }
}

impl<T: DataSource> DataSource for Serialized<T> {
    fn fill(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        self.inner.lock().fill(buf)
    }
}

impl<T: DataSink> DataSink for Serialized<T> {
    fn process(&self, buffer_id: usize, data: &[u8]) {
        self.inner.lock().process(buffer_id, data)
    }
}

/// The empty-buffer and full-buffer queues.
pub struct BufferPool {
    pub empty: Arc<SyncQueue<Buffer>>,
    pub full: Arc<SyncQueue<Buffer>>,
    buffer_count: usize,
}

impl BufferPool {
    /// Seeds the empty queue with `buffer_count` buffers of `buffer_size` bytes.
    pub fn new(
        buffer_count: usize,
        buffer_size: usize,
        timeout: Duration,
    ) -> Result<BufferPool, PipelineError> {
        let empty = SyncQueue::try_with_buffers(buffer_count, buffer_size, timeout)
            .map_err(|source| PipelineError::QueueInit {
                queue: "empty",
                source,
            })?;
        // Same room as the empty queue so a full pool never reallocates.
        let full = SyncQueue::try_with_capacity(buffer_count, timeout).map_err(|source| {
            PipelineError::QueueInit {
                queue: "full",
                source,
            }
        })?;
        Ok(BufferPool {
            empty: Arc::new(empty),
            full: Arc::new(full),
            buffer_count,
        })
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Buffers currently sitting in either queue, i.e. not held by any thread.
    pub fn queued(&self) -> usize {
        self.empty.len() + self.full.len()
    }
}
