use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace, warn};

use super::core::{Buffer, SyncQueue};
use super::errors::{PopError, SourceError};
use super::pipeline::StopToken;

/// Where producers get their data from, e.g. a device driver.
///
/// `fill` may block. It writes into `buf` and returns how many bytes from the start
/// are valid. Implementations must be callable from several producer threads at
/// once; wrap a source that is not in [`crate::pipeline::Serialized`].
pub trait DataSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<usize, SourceError>;
}

impl<S: DataSource + ?Sized> DataSource for Arc<S> {
    fn fill(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        (**self).fill(buf)
    }
}

/// A closure used as a [`DataSource`]. Build one with [`source_fn`].
pub struct FnSource<F>(F);

pub fn source_fn<F>(f: F) -> FnSource<F>
where
    F: Fn(&mut [u8]) -> Result<usize, SourceError> + Send + Sync,
{
    FnSource(f)
}

impl<F> DataSource for FnSource<F>
where
    F: Fn(&mut [u8]) -> Result<usize, SourceError> + Send + Sync,
{
    fn fill(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        (self.0)(buf)
    }
}

/// Stand-in for a device: reports a random length below the capacity and stamps the
/// valid bytes with a counter.
#[derive(Default)]
pub struct PseudoSource {
    stamp: Mutex<u8>,
}

impl DataSource for PseudoSource {
    fn fill(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let filled = rand::thread_rng().gen_range(0..buf.len());
        let mut stamp = self.stamp.lock();
        *stamp = stamp.wrapping_add(1);
        for byte in &mut buf[..filled] {
            *byte = *stamp;
        }
        Ok(filled)
    }
}

/// What one producer iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// A buffer of this many bytes went to the full queue.
    Filled(usize),
    /// The source failed; the buffer went back to the empty queue.
    SourceFailed,
    /// No empty buffer showed up before the timeout.
    Idle,
    /// The empty queue failed to initialize; no buffer will ever arrive.
    Disabled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub filled: u64,
    pub bytes: u64,
    pub source_failures: u64,
    pub idle: u64,
}

pub struct Producer {
    id: usize,
    empty: Arc<SyncQueue<Buffer>>,
    full: Arc<SyncQueue<Buffer>>,
    source: Arc<dyn DataSource>,
    stats: WriterStats,
}

impl Producer {
    pub fn new(
        id: usize,
        empty: Arc<SyncQueue<Buffer>>,
        full: Arc<SyncQueue<Buffer>>,
        source: Arc<dyn DataSource>,
    ) -> Producer {
        Producer {
            id,
            empty,
            full,
            source,
            stats: WriterStats::default(),
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Moves at most one buffer from the empty queue to the full queue.
    pub fn step(&mut self) -> WriteStep {
        let mut buffer = match self.empty.pop() {
            Ok(buffer) => buffer,
            Err(PopError::Timeout) => {
                self.stats.idle += 1;
                return WriteStep::Idle;
            }
            Err(e @ PopError::Disabled(_)) => {
                warn!(writer = self.id, "empty queue unusable: {}", e);
                return WriteStep::Disabled;
            }
        };

        let result = self.source.fill(buffer.storage_mut()).and_then(|filled| {
            if buffer.set_len(filled) {
                Ok(filled)
            } else {
                Err(SourceError::Overrun {
                    filled,
                    capacity: buffer.capacity(),
                })
            }
        });
        match result {
            Ok(filled) => {
                trace!(writer = self.id, buffer = buffer.id(), filled, "filled buffer");
                self.stats.filled += 1;
                self.stats.bytes += filled as u64;
                self.hand_over(buffer);
                WriteStep::Filled(filled)
            }
            Err(e) => {
                warn!(writer = self.id, buffer = buffer.id(), "source failed: {}", e);
                self.stats.source_failures += 1;
                self.give_back(buffer);
                WriteStep::SourceFailed
            }
        }
    }

    /// Runs until `token` is stopped. The token is checked once per iteration.
    /// A disabled empty queue stops the token, since the writer has nothing to do.
    pub fn run(mut self, token: &StopToken) -> WriterStats {
        debug!(writer = self.id, "writer started");
        while token.is_running() {
            if self.step() == WriteStep::Disabled {
                token.stop();
            }
        }
        debug!(writer = self.id, stats = ?self.stats, "writer done");
        self.stats
    }

    fn hand_over(&self, buffer: Buffer) {
        if let Err(rejected) = self.full.push(buffer) {
            // The full queue is disabled; keep the buffer in circulation.
            self.give_back(rejected.into_inner());
        }
    }

    fn give_back(&self, mut buffer: Buffer) {
        buffer.clear();
        if let Err(rejected) = self.empty.push(buffer) {
            warn!(
                writer = self.id,
                buffer = rejected.0.id(),
                "both queues disabled, dropping buffer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    fn queues(count: usize) -> (Arc<SyncQueue<Buffer>>, Arc<SyncQueue<Buffer>>) {
        (
            Arc::new(SyncQueue::with_buffers(count, 64, SHORT)),
            Arc::new(SyncQueue::with_buffers(0, 64, SHORT)),
        )
    }

    #[test]
    fn filled_buffer_moves_to_full_queue() {
        let (empty, full) = queues(1);
        let source = source_fn(|buf: &mut [u8]| {
            buf[..3].copy_from_slice(b"abc");
            Ok(3)
        });
        let mut producer = Producer::new(0, empty.clone(), full.clone(), Arc::new(source));

        assert_eq!(producer.step(), WriteStep::Filled(3));
        assert!(empty.is_empty());
        let buffer = full.pop().unwrap();
        assert_eq!(buffer.as_slice(), b"abc");
        assert_eq!(producer.stats().filled, 1);
        assert_eq!(producer.stats().bytes, 3);
    }

    #[test]
    fn source_failure_returns_buffer_to_empty_queue() {
        let (empty, full) = queues(1);
        let source = source_fn(|_: &mut [u8]| Err(SourceError::Failed(-1)));
        let mut producer = Producer::new(0, empty.clone(), full.clone(), Arc::new(source));

        assert_eq!(producer.step(), WriteStep::SourceFailed);
        assert!(full.is_empty());
        assert_eq!(empty.len(), 1);
        assert_eq!(producer.stats().source_failures, 1);
    }

    #[test]
    fn overrun_counts_as_source_failure() {
        let (empty, full) = queues(1);
        let source = source_fn(|buf: &mut [u8]| Ok(buf.len() + 1));
        let mut producer = Producer::new(0, empty.clone(), full.clone(), Arc::new(source));

        assert_eq!(producer.step(), WriteStep::SourceFailed);
        assert_eq!(empty.len(), 1);
        assert!(empty.pop().unwrap().is_empty());
    }

    #[test]
    fn dry_pool_is_idle() {
        let (empty, full) = queues(0);
        let mut producer = Producer::new(0, empty, full, Arc::new(PseudoSource::default()));
        assert_eq!(producer.step(), WriteStep::Idle);
        assert_eq!(producer.stats().idle, 1);
    }

    #[test]
    fn pseudo_source_stays_below_capacity() {
        let source = PseudoSource::default();
        let mut buf = [0u8; 32];
        for _ in 0..100 {
            assert!(source.fill(&mut buf).unwrap() < buf.len());
        }
        assert_eq!(source.fill(&mut []), Ok(0));
    }

    #[test]
    fn run_stops_when_token_is_cleared() {
        let (empty, full) = queues(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let token = StopToken::new();
        let source = {
            let calls = Arc::clone(&calls);
            let token = token.clone();
            source_fn(move |_: &mut [u8]| {
                if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    token.stop();
                }
                Ok(0)
            })
        };
        let producer = Producer::new(0, empty.clone(), full.clone(), Arc::new(source));

        let stats = producer.run(&token);
        assert_eq!(stats.filled, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(full.len(), 2);
    }

    #[test]
    fn disabled_empty_queue_ends_the_run() {
        let empty = Arc::new(SyncQueue::with_buffers(1, usize::MAX, SHORT));
        assert!(!empty.is_ready());
        let full = Arc::new(SyncQueue::with_buffers(0, 64, SHORT));
        let calls = Arc::new(AtomicUsize::new(0));
        let source = {
            let calls = Arc::clone(&calls);
            source_fn(move |_: &mut [u8]| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            })
        };
        let token = StopToken::new();
        let producer = Producer::new(0, empty, full, Arc::new(source));

        let stats = producer.run(&token);
        assert!(!token.is_running());
        assert_eq!(stats, WriterStats::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
