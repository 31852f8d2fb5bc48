use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tasklane_config::QueueConfig;
use tasklane_log::{LogError, PanicMessage};

use crate::wake::{Wake, WakeSignal};

/// An opaque reference to a zero-argument callable registered in the host context.
///
/// The queue never resolves handles. Only the host knows what a handle refers to and resolves it
/// in the executor passed to [`TaskQueue::drain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// Wraps a host-side token.
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    /// Returns the host-side token.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskHandle {
    fn from(token: u64) -> Self {
        Self(token)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// How a push treats a handle that is already pending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DedupMode {
    /// Always enqueue another entry.
    #[default]
    Multiple,
    /// Skip the push if the handle is already pending.
    Once,
    /// Move the pending entry to the back of the queue.
    Last,
}

/// Error returned by [`TaskQueue::push`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// All slots are occupied until the host drains the queue.
    #[error("task queue is full (capacity {capacity})")]
    Full {
        /// The configured capacity of the queue.
        capacity: usize,
    },
}

/// Counters describing a single [`TaskQueue::drain`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Handles whose executor returned successfully.
    pub executed: usize,
    /// Tombstoned slots left behind by [`DedupMode::Last`].
    pub skipped: usize,
    /// Handles whose executor returned an error or panicked.
    pub failed: usize,
}

/// Fixed-size ring of slots with monotonically increasing cursors.
///
/// `head` and `tail` are unbounded 64-bit counters and only ever used modulo the slot count, so
/// they never need to be normalized. `None` marks a tombstone.
struct Ring {
    slots: Box<[Option<TaskHandle>]>,
    head: u64,
    tail: u64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    fn index(&self, cursor: u64) -> usize {
        (cursor % self.slots.len() as u64) as usize
    }

    fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    fn is_full(&self) -> bool {
        self.len() >= self.slots.len()
    }

    /// Returns the slot index of the pending entry for `handle`, if any.
    fn find(&self, handle: TaskHandle) -> Option<usize> {
        (self.head..self.tail)
            .map(|cursor| self.index(cursor))
            .find(|&index| self.slots[index] == Some(handle))
    }

    fn append(&mut self, handle: TaskHandle) {
        let index = self.index(self.tail);
        self.slots[index] = Some(handle);
        self.tail += 1;
    }

    /// Takes the slot at `head`. The outer `None` means the ring is empty.
    fn pop(&mut self) -> Option<Option<TaskHandle>> {
        if self.head == self.tail {
            return None;
        }

        let index = self.index(self.head);
        self.head += 1;
        Some(self.slots[index].take())
    }
}

/// A bounded FIFO queue of task handles hands follow-up work back to the host loop.
///
/// Any number of threads may [`push`](Self::push), while a single host thread consumes entries
/// with [`drain`](Self::drain). Every push ticks the configured [`Wake`] sink, so an event-driven
/// host knows when to drain.
///
/// Entries are delivered in the order they were appended. With [`DedupMode::Last`], a pending
/// entry is replaced by a tombstone and appended again, so slots between the cursors can be
/// empty. Tombstones occupy capacity until the host drains past them.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tasklane_threading::{DedupMode, TaskHandle, TaskQueue, WakeSignal};
///
/// let signal = Arc::new(WakeSignal::new());
/// let queue = TaskQueue::new(4, signal.clone());
///
/// queue.push(TaskHandle::new(1), DedupMode::Multiple).unwrap();
/// queue.push(TaskHandle::new(2), DedupMode::Multiple).unwrap();
/// queue.push(TaskHandle::new(1), DedupMode::Last).unwrap();
/// assert_eq!(signal.take(), 3);
///
/// let mut order = Vec::new();
/// queue.drain(|handle| {
///     order.push(handle.value());
///     Ok::<_, std::io::Error>(())
/// });
/// assert_eq!(order, [2, 1]);
/// ```
pub struct TaskQueue {
    ring: Mutex<Ring>,
    capacity: usize,
    wake: Arc<dyn Wake>,
}

impl TaskQueue {
    /// Creates a queue with room for `capacity` pending slots.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, wake: Arc<dyn Wake>) -> Self {
        let capacity = capacity.max(1);

        Self {
            ring: Mutex::new(Ring::new(capacity)),
            capacity,
            wake,
        }
    }

    /// Creates a queue from the queue section of the configuration.
    pub fn from_config(config: &QueueConfig, wake: Arc<dyn Wake>) -> Self {
        Self::new(config.capacity, wake)
    }

    /// Returns the maximum number of pending slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of pending slots, including tombstones.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Returns `true` if no slots are pending.
    ///
    /// This is a snapshot; concurrent pushes may change the result immediately.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues `handle` according to `mode`.
    ///
    /// The wake sink is ticked exactly once per call, whether the push appended an entry, was
    /// absorbed by [`DedupMode::Once`], or was rejected because the queue is full. A rejected push
    /// leaves the queue unchanged, including any pending entry a [`DedupMode::Last`] push would
    /// have moved.
    pub fn push(&self, handle: TaskHandle, mode: DedupMode) -> Result<(), QueueError> {
        let result = self.push_locked(handle, mode);
        self.wake.wake();

        if let Err(ref error) = result {
            tasklane_log::warn!(handle = handle.value(), "rejected task push: {error}");
        }

        result
    }

    fn push_locked(&self, handle: TaskHandle, mode: DedupMode) -> Result<(), QueueError> {
        let mut ring = self.ring.lock();

        let pending = match mode {
            DedupMode::Multiple => None,
            DedupMode::Once | DedupMode::Last => ring.find(handle),
        };

        if pending.is_some() && mode == DedupMode::Once {
            return Ok(());
        }

        if ring.is_full() {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        if let Some(index) = pending {
            ring.slots[index] = None;
        }

        ring.append(handle);
        Ok(())
    }

    /// Runs `executor` for every pending handle in FIFO order until the queue is empty.
    ///
    /// Must only be called from the host thread. The lock is released while the executor runs, so
    /// the executor and other threads may push new entries, which are picked up by the same pass.
    /// Executor errors and panics are logged and counted, they never abort the drain.
    pub fn drain<F, E>(&self, mut executor: F) -> DrainStats
    where
        F: FnMut(TaskHandle) -> Result<(), E>,
        E: std::error::Error,
    {
        let mut stats = DrainStats::default();

        loop {
            let Some(slot) = self.ring.lock().pop() else {
                break;
            };

            let Some(handle) = slot else {
                stats.skipped += 1;
                continue;
            };

            match std::panic::catch_unwind(AssertUnwindSafe(|| executor(handle))) {
                Ok(Ok(())) => stats.executed += 1,
                Ok(Err(error)) => {
                    stats.failed += 1;
                    tasklane_log::error!(
                        handle = handle.value(),
                        "failed to run queued task: {}",
                        LogError(&error)
                    );
                }
                Err(payload) => {
                    stats.failed += 1;
                    tasklane_log::error!(
                        handle = handle.value(),
                        "queued task panicked: {}",
                        PanicMessage(&*payload)
                    );
                }
            }
        }

        stats
    }

    /// Waits up to `timeout` for work and drains the queue.
    ///
    /// This is the blocking host-loop integration for queues created with a [`WakeSignal`]. If
    /// entries are already pending, the queue is drained without waiting. Ticks are consumed
    /// before draining, so pushes that race with the drain leave a tick for the next call.
    pub fn poll<F, E>(&self, signal: &WakeSignal, timeout: Duration, executor: F) -> DrainStats
    where
        F: FnMut(TaskHandle) -> Result<(), E>,
        E: std::error::Error,
    {
        if self.is_empty() && !signal.wait_timeout(timeout) {
            return DrainStats::default();
        }

        signal.take();
        self.drain(executor)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("TaskQueue")
            .field("capacity", &self.capacity)
            .field("head", &ring.head)
            .field("tail", &ring.tail)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::io;
    use std::thread;

    use super::*;

    fn queue(capacity: usize) -> (TaskQueue, Arc<WakeSignal>) {
        let signal = Arc::new(WakeSignal::new());
        (TaskQueue::new(capacity, signal.clone()), signal)
    }

    fn drain_all(queue: &TaskQueue) -> Vec<u64> {
        let mut seen = Vec::new();
        queue.drain(|handle| {
            seen.push(handle.value());
            Ok::<_, Infallible>(())
        });
        seen
    }

    fn h(token: u64) -> TaskHandle {
        TaskHandle::new(token)
    }

    #[test]
    fn test_multiple_pushes_drain_in_order() {
        let (queue, _) = queue(8);
        for token in [5, 3, 9, 1] {
            queue.push(h(token), DedupMode::Multiple).unwrap();
        }
        assert_eq!(drain_all(&queue), [5, 3, 9, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_multiple_allows_duplicates() {
        let (queue, _) = queue(4);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(1), DedupMode::Multiple).unwrap();
        assert_eq!(drain_all(&queue), [1, 1]);
    }

    #[test]
    fn test_full_queue_rejects_and_recovers() {
        tasklane_log::init_test!();
        let (queue, signal) = queue(4);

        for token in 1..=4 {
            queue.push(h(token), DedupMode::Multiple).unwrap();
        }
        assert_eq!(
            queue.push(h(5), DedupMode::Multiple),
            Err(QueueError::Full { capacity: 4 })
        );
        // The rejected push still ticked the signal.
        assert_eq!(signal.take(), 5);

        assert_eq!(drain_all(&queue), [1, 2, 3, 4]);
        assert!(queue.is_empty());

        queue.push(h(5), DedupMode::Multiple).unwrap();
        assert_eq!(drain_all(&queue), [5]);
    }

    #[test]
    fn test_once_skips_pending_handle() {
        let (queue, signal) = queue(4);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(1), DedupMode::Once).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(signal.take(), 2);
        assert_eq!(drain_all(&queue), [1]);
    }

    #[test]
    fn test_once_succeeds_on_full_queue_if_pending() {
        let (queue, _) = queue(2);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(2), DedupMode::Multiple).unwrap();
        assert_eq!(queue.push(h(1), DedupMode::Once), Ok(()));
        assert!(queue.push(h(3), DedupMode::Once).is_err());
    }

    #[test]
    fn test_once_ignores_drained_history() {
        let (queue, _) = queue(4);
        queue.push(h(1), DedupMode::Once).unwrap();
        assert_eq!(drain_all(&queue), [1]);
        queue.push(h(1), DedupMode::Once).unwrap();
        assert_eq!(drain_all(&queue), [1]);
    }

    #[test]
    fn test_last_moves_pending_handle_to_tail() {
        let (queue, _) = queue(8);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(2), DedupMode::Multiple).unwrap();
        queue.push(h(1), DedupMode::Last).unwrap();

        // The tombstone keeps its slot until drained.
        assert_eq!(queue.len(), 3);

        let mut seen = Vec::new();
        let stats = queue.drain(|handle| {
            seen.push(handle.value());
            Ok::<_, Infallible>(())
        });
        assert_eq!(seen, [2, 1]);
        assert_eq!(
            stats,
            DrainStats {
                executed: 2,
                skipped: 1,
                failed: 0,
            }
        );
    }

    #[test]
    fn test_last_appends_when_not_pending() {
        let (queue, _) = queue(4);
        queue.push(h(7), DedupMode::Last).unwrap();
        queue.push(h(8), DedupMode::Last).unwrap();
        assert_eq!(drain_all(&queue), [7, 8]);
    }

    #[test]
    fn test_last_on_full_queue_keeps_pending_entry() {
        let (queue, _) = queue(2);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(2), DedupMode::Multiple).unwrap();

        assert!(queue.push(h(1), DedupMode::Last).is_err());
        assert_eq!(drain_all(&queue), [1, 2]);
    }

    #[test]
    fn test_failed_task_does_not_abort_drain() {
        tasklane_log::init_test!();
        let (queue, _) = queue(4);
        for token in 1..=3 {
            queue.push(h(token), DedupMode::Multiple).unwrap();
        }

        let mut seen = Vec::new();
        let stats = queue.drain(|handle| {
            seen.push(handle.value());
            if handle.value() == 2 {
                return Err(io::Error::other("handler raised"));
            }
            Ok(())
        });

        assert_eq!(seen, [1, 2, 3]);
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_panicking_task_does_not_abort_drain() {
        tasklane_log::init_test!();
        let (queue, _) = queue(4);
        queue.push(h(1), DedupMode::Multiple).unwrap();
        queue.push(h(2), DedupMode::Multiple).unwrap();

        let mut seen = Vec::new();
        let stats = queue.drain(|handle| {
            if handle.value() == 1 {
                panic!("handler exploded");
            }
            seen.push(handle.value());
            Ok::<_, Infallible>(())
        });

        assert_eq!(seen, [2]);
        assert_eq!(stats.failed, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tasks_pushed_during_drain_are_executed() {
        let (queue, _) = queue(4);
        queue.push(h(1), DedupMode::Multiple).unwrap();

        let mut seen = Vec::new();
        queue.drain(|handle| {
            seen.push(handle.value());
            if handle.value() < 3 {
                queue.push(h(handle.value() + 1), DedupMode::Multiple).unwrap();
            }
            Ok::<_, Infallible>(())
        });

        assert_eq!(seen, [1, 2, 3]);
    }

    #[test]
    fn test_cursors_wrap_around_capacity() {
        let (queue, _) = queue(3);
        let mut expected = Vec::new();
        let mut seen = Vec::new();

        for round in 0..10u64 {
            for offset in 0..2 {
                let token = round * 10 + offset;
                queue.push(h(token), DedupMode::Multiple).unwrap();
                expected.push(token);
            }
            seen.extend(drain_all(&queue));
        }

        assert_eq!(seen, expected);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let (queue, signal) = queue(4096);
        let queue = Arc::new(queue);

        let producers: Vec<_> = (0..4u64)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..500u64 {
                        queue
                            .push(h(producer * 1000 + seq), DedupMode::Multiple)
                            .unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let seen = drain_all(&queue);
        assert_eq!(seen.len(), 2000);
        assert_eq!(signal.take(), 2000);

        for producer in 0..4u64 {
            let own: Vec<_> = seen
                .iter()
                .filter(|token| **token / 1000 == producer)
                .map(|token| token % 1000)
                .collect();
            assert_eq!(own, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_poll_drains_after_tick() {
        let (queue, signal) = queue(4);
        let queue = Arc::new(queue);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.push(h(42), DedupMode::Multiple).unwrap();
            })
        };

        let mut seen = Vec::new();
        let stats = queue.poll(&signal, Duration::from_secs(5), |handle| {
            seen.push(handle.value());
            Ok::<_, Infallible>(())
        });
        producer.join().unwrap();

        assert_eq!(seen, [42]);
        assert_eq!(stats.executed, 1);
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_poll_times_out_on_idle_queue() {
        let (queue, signal) = queue(4);
        let stats = queue.poll(&signal, Duration::from_millis(5), |_| {
            Ok::<_, Infallible>(())
        });
        assert_eq!(stats, DrainStats::default());
    }
}
