//! The synchronized exchange queue.
//!
//! Nodes enter at the head and leave from the tail, so a queue hands nodes out in the
//! order they were pushed. `pop` is the only call that blocks; it waits on a condition
//! variable for at most the queue's timeout. Every structural change happens under a
//! single mutex that is never held across the wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::errors::{InitError, PopError, PushError};

mod buffer;

pub use buffer::Buffer;

pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SyncQueue<T> {
    nodes: Mutex<VecDeque<T>>,
    available: Condvar,
    timeout: Duration,
    // Set once at construction. A queue that failed to come up never recovers.
    status: Result<(), InitError>,
}

impl<T> SyncQueue<T> {
    /// An empty queue with the default 3 second pop timeout.
    pub fn new() -> SyncQueue<T> {
        SyncQueue::with_timeout(DEFAULT_POP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> SyncQueue<T> {
        SyncQueue::from_nodes(VecDeque::new(), timeout)
    }

    /// An empty queue with room for `capacity` nodes reserved up front, so pushes up
    /// to that count never reallocate.
    pub fn try_with_capacity(
        capacity: usize,
        timeout: Duration,
    ) -> Result<SyncQueue<T>, InitError> {
        let mut nodes = VecDeque::new();
        nodes.try_reserve_exact(capacity).map_err(|source| InitError::Storage {
            count: capacity,
            source,
        })?;
        Ok(SyncQueue::from_nodes(nodes, timeout))
    }

    fn from_nodes(nodes: VecDeque<T>, timeout: Duration) -> SyncQueue<T> {
        SyncQueue {
            nodes: Mutex::new(nodes),
            available: Condvar::new(),
            timeout,
            status: Ok(()),
        }
    }

    fn disabled(err: InitError, timeout: Duration) -> SyncQueue<T> {
        SyncQueue {
            nodes: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            timeout,
            status: Err(err),
        }
    }

    /// Whether construction succeeded. Check once after building the queue.
    pub fn status(&self) -> Result<(), &InitError> {
        self.status.as_ref().map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ok()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Inserts `node` at the head and wakes one waiting `pop`, if any.
    ///
    /// Only fails on a disabled queue, in which case the node is handed back.
    pub fn push(&self, node: T) -> Result<(), PushError<T>> {
        if self.status.is_err() {
            return Err(PushError(node));
        }
        self.nodes.lock().push_front(node);
        self.available.notify_one();
        Ok(())
    }

    /// Takes the oldest node, waiting up to the queue's timeout for one to arrive.
    pub fn pop(&self) -> Result<T, PopError> {
        self.pop_timeout(self.timeout)
    }

    /// Like [`SyncQueue::pop`] with an explicit timeout for this call.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        self.check()?;
        let deadline = Instant::now().checked_add(timeout);
        let mut nodes = self.nodes.lock();
        loop {
            if let Some(node) = nodes.pop_back() {
                return Ok(node);
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut nodes, deadline).timed_out() {
                        // A push may have landed right as the deadline passed.
                        return nodes.pop_back().ok_or(PopError::Timeout);
                    }
                }
                None => self.available.wait(&mut nodes),
            }
        }
    }

    /// Takes the oldest node without waiting.
    pub fn try_pop(&self) -> Result<T, PopError> {
        self.check()?;
        self.nodes.lock().pop_back().ok_or(PopError::Timeout)
    }

    /// Best-effort: the answer may be stale as soon as it is returned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort node count. Zero for a disabled queue.
    pub fn len(&self) -> usize {
        if self.status.is_err() {
            return 0;
        }
        self.nodes.lock().len()
    }

    #[inline]
    fn check(&self) -> Result<(), PopError> {
        match &self.status {
            Ok(()) => Ok(()),
            Err(e) => Err(PopError::Disabled(e.clone())),
        }
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        SyncQueue::new()
    }
}

impl SyncQueue<Buffer> {
    /// Builds a queue seeded with `count` zeroed buffers of `size` bytes.
    ///
    /// If the buffers cannot be allocated the queue comes back disabled; see
    /// [`SyncQueue::status`]. Buffers are numbered from 0 in the order `pop`
    /// returns them.
    pub fn with_buffers(count: usize, size: usize, timeout: Duration) -> SyncQueue<Buffer> {
        match SyncQueue::try_with_buffers(count, size, timeout) {
            Ok(queue) => queue,
            Err(e) => {
                warn!("buffer queue disabled: {}", e);
                SyncQueue::disabled(e, timeout)
            }
        }
    }

    pub fn try_with_buffers(
        count: usize,
        size: usize,
        timeout: Duration,
    ) -> Result<SyncQueue<Buffer>, InitError> {
        let queue = SyncQueue::try_with_capacity(count, timeout)?;
        {
            let mut nodes = queue.nodes.lock();
            for index in 0..count {
                let buffer = Buffer::try_new(index, size).map_err(|source| InitError::Buffer {
                    index,
                    size,
                    source,
                })?;
                nodes.push_front(buffer);
            }
        }
        debug!(count, size, "seeded buffer queue");
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn pops_in_push_order() {
        let queue = SyncQueue::with_timeout(SHORT);
        for x in 0..10 {
            queue.push(x).unwrap();
        }
        let popped: Vec<i32> = (0..10).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(popped, (0..10).collect::<Vec<_>>());
        assert_eq!(queue.pop(), Err(PopError::Timeout));
    }

    #[test]
    fn is_empty_tracks_push_and_pop() {
        let queue = SyncQueue::with_buffers(0, 512, SHORT);
        assert!(queue.is_ready());
        assert!(queue.is_empty());

        queue.push(Buffer::try_new(0, 512).unwrap()).unwrap();
        assert!(!queue.is_empty());
        assert_eq!(queue.len(), 1);

        queue.pop().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn single_node_leaves_queue_empty() {
        let queue = SyncQueue::with_timeout(SHORT);
        queue.push("only").unwrap();
        assert_eq!(queue.pop().unwrap(), "only");
        assert!(queue.is_empty());
        assert!(queue.try_pop().unwrap_err().is_timeout());

        queue.push("again").unwrap();
        assert_eq!(queue.try_pop().unwrap(), "again");
    }

    #[test]
    fn pop_on_empty_waits_for_the_timeout() {
        let queue: SyncQueue<u8> = SyncQueue::with_timeout(Duration::from_millis(200));
        let start = Instant::now();
        assert_eq!(queue.pop(), Err(PopError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_timeout_overrides_the_default() {
        let queue: SyncQueue<u8> = SyncQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(SHORT), Err(PopError::Timeout));
        assert!(start.elapsed() < DEFAULT_POP_TIMEOUT);
    }

    #[test]
    fn blocked_pop_wakes_on_push() {
        let queue = Arc::new(SyncQueue::with_timeout(Duration::from_secs(5)));
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(SHORT);
        queue.push(42u32).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(42));
    }

    #[test]
    fn timeout_past_any_deadline_still_wakes_on_push() {
        let queue = Arc::new(SyncQueue::with_timeout(Duration::from_millis(u64::MAX)));
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(SHORT);
        queue.push(7u32).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(7));
    }

    #[test]
    fn concurrent_pushes_are_conserved() {
        const K: usize = 16;
        let queue = Arc::new(SyncQueue::with_timeout(SHORT));
        let pushers: Vec<_> = (0..K)
            .map(|x| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.push(x).unwrap())
            })
            .collect();
        for pusher in pushers {
            pusher.join().unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..K {
            assert!(seen.insert(queue.pop().unwrap()));
        }
        assert_eq!(seen, (0..K).collect::<HashSet<_>>());
        assert!(queue.pop().unwrap_err().is_timeout());
    }

    #[test]
    fn seeded_queue_yields_exactly_count_buffers() {
        let queue = SyncQueue::try_with_buffers(4, 256, SHORT).unwrap();
        assert_eq!(queue.len(), 4);
        for expected_id in 0..4 {
            let buffer = queue.pop().unwrap();
            assert_eq!(buffer.id(), expected_id);
            assert_eq!(buffer.capacity(), 256);
        }
        assert_eq!(queue.pop().unwrap_err(), PopError::Timeout);
    }

    #[test]
    fn failed_allocation_disables_the_queue() {
        let queue = SyncQueue::with_buffers(1, usize::MAX, Duration::from_secs(10));
        assert!(!queue.is_ready());
        assert!(matches!(
            queue.status(),
            Err(InitError::Buffer { index: 0, .. })
        ));

        // Neither call may block on a disabled queue.
        let start = Instant::now();
        assert!(matches!(queue.pop(), Err(PopError::Disabled(_))));
        assert!(matches!(queue.try_pop(), Err(PopError::Disabled(_))));
        assert!(start.elapsed() < Duration::from_secs(1));

        let rejected = queue.push(Buffer::try_new(9, 8).unwrap()).unwrap_err();
        assert_eq!(rejected.into_inner().id(), 9);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn storage_reservation_failure_is_reported() {
        let err = SyncQueue::try_with_buffers(usize::MAX, 1, SHORT).err().unwrap();
        assert!(matches!(err, InitError::Storage { count: usize::MAX, .. }));
    }
}
