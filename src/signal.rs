//! One-to-many counting completion notification.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

/// A counting, broadcast completion signal.
///
/// Each [`fire`](Signal::fire) increments a monotonic count and wakes every
/// thread parked in [`wait`](Signal::wait). The count survives wake-ups: a
/// caller that wants edge semantics reads-and-resets it with
/// [`clear`](Signal::clear). One signal may be shared by any number of
/// observers and any number of firers, which makes it suitable as a single
/// completion handle for a whole batch of messages.
///
/// # Example
///
/// ```
/// use courier::Signal;
/// use std::sync::Arc;
/// use std::thread;
///
/// let signal = Arc::new(Signal::new());
/// let observer = Arc::clone(&signal);
///
/// let waiter = thread::spawn(move || {
///     observer.wait();
///     observer.count()
/// });
///
/// signal.fire();
/// assert!(waiter.join().unwrap() >= 1);
/// ```
pub struct Signal {
    /// Fire tally. Monotonic until [`clear`](Signal::clear); guarded by its
    /// mutex, which also backs the condition.
    count: Mutex<u64>,
    cond: Condvar,
    /// Threads currently parked in [`wait`](Signal::wait). Mutated only
    /// under the mutex.
    waiters: AtomicU32,
}

impl Signal {
    /// Creates a signal with a count of zero.
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
            waiters: AtomicU32::new(0),
        }
    }

    /// Parks the caller until the count is non-zero.
    ///
    /// Returns immediately if the signal has already been fired. Spurious
    /// wake-ups re-check the count and go back to sleep. The count is not
    /// cleared on return; call [`clear`](Signal::clear) for that.
    pub fn wait(&self) {
        let mut guard = self.count.lock().unwrap();
        if *guard == 0 {
            self.waiters.fetch_add(1, Ordering::Relaxed);
            while *guard == 0 {
                guard = self.cond.wait(guard).unwrap();
            }
            self.waiters.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Increments the count by one and wakes every parked waiter.
    pub fn fire(&self) {
        let mut guard = self.count.lock().unwrap();
        *guard += 1;
        self.cond.notify_all();
    }

    /// Returns the number of times the signal has been fired since
    /// construction or the last [`clear`](Signal::clear).
    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Resets the count to zero, returning the prior value.
    pub fn clear(&self) -> u64 {
        let mut guard = self.count.lock().unwrap();
        mem::take(&mut *guard)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("count", &self.count())
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
