use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A notification sink that tells the host loop the task queue needs draining.
///
/// The task queue invokes [`Wake::wake`] once per push, including rejected pushes. Implementations
/// must be cheap and must never call back into the queue.
pub trait Wake: Send + Sync {
    /// Signals that the queue may have pending work.
    fn wake(&self);
}

impl Wake for tokio::sync::Notify {
    fn wake(&self) {
        // Stores a permit if nobody is waiting, so a push is never missed by an async host.
        self.notify_one();
    }
}

/// A counting, coalescing wake signal for blocking host loops.
///
/// Every [`notify`](Self::notify) increments a counter that the host observes and resets with
/// [`take`](Self::take), similar to reading an eventfd. Bursts of notifications collapse into a
/// single observation; the only guarantee is that at least one tick occurred since the counter
/// was last taken.
#[derive(Debug, Default)]
pub struct WakeSignal {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl WakeSignal {
    /// Creates a signal with no pending ticks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tick and wakes up all waiters.
    pub fn notify(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        self.condvar.notify_all();
    }

    /// Returns the number of ticks since the last call and resets the counter.
    pub fn take(&self) -> u64 {
        std::mem::take(&mut *self.count.lock())
    }

    /// Returns `true` if at least one tick has not been taken yet.
    pub fn is_pending(&self) -> bool {
        *self.count.lock() > 0
    }

    /// Blocks until a tick is pending, without consuming it.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.condvar.wait(&mut count);
        }
    }

    /// Blocks until a tick is pending or the timeout elapses.
    ///
    /// Returns `true` if a tick is pending. The tick is not consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        self.condvar
            .wait_while_for(&mut count, |count| *count == 0, timeout);
        *count > 0
    }
}

impl Wake for WakeSignal {
    fn wake(&self) {
        self.notify();
    }
}
