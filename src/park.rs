//! Parking support for the blocking queue operations.
//!
//! Each queue owns two [`WaitSet`]s, one per side: receivers park on the
//! reader set when the queue is empty, senders park on the writer set when
//! it is full. The opposite side wakes the set after a successful
//! operation, and `close` drains both sets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// A set of threads parked on one side of a queue.
pub(crate) struct WaitSet {
    /// Threads between their park-entry increment and park-exit decrement.
    ///
    /// Mutated only while `lock` is held; read without the lock by the
    /// wake checks. `SeqCst` pairs with the `SeqCst` queue operations: if a
    /// waker's load misses a registration, the waiter's re-attempt under
    /// the lock is ordered after the waker's publish/consume and succeeds.
    waiters: AtomicU32,
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitSet {
    pub(crate) fn new() -> Self {
        Self {
            waiters: AtomicU32::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Number of threads currently registered in the set.
    pub(crate) fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Registers the caller and runs `attempt` until it yields a result,
    /// parking on the condition between attempts.
    ///
    /// The first attempt already runs under the set's lock, which closes
    /// the lost-wakeup window: a wake issued by the opposite side after the
    /// caller's last unlocked attempt cannot slip past the registration.
    /// `attempt` must not take locks of its own.
    pub(crate) fn park_until<R>(&self, mut attempt: impl FnMut() -> Option<R>) -> R {
        let mut guard = self.lock.lock().unwrap();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = loop {
            if let Some(result) = attempt() {
                break result;
            }
            guard = self.cond.wait(guard).unwrap();
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
        result
    }

    /// Wakes one parked thread.
    ///
    /// Costs a lock round-trip only when the set is non-empty, so the hot
    /// path of an uncontended queue never touches the mutex.
    pub(crate) fn wake_one(&self) {
        if self.waiters() != 0 {
            let _guard = self.lock.lock().unwrap();
            self.cond.notify_one();
        }
    }

    /// Wakes every parked thread.
    pub(crate) fn wake_all(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_all();
    }

    /// Holds the set's lock.
    ///
    /// `close` takes both sets' locks around the closed-flag write so that
    /// no thread can register, re-attempt, and park without observing the
    /// flag afterwards.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn immediate_result_does_not_park() {
        let set = WaitSet::new();
        let out = set.park_until(|| Some(7));
        assert_eq!(out, 7);
        assert_eq!(set.waiters(), 0);
    }

    #[test]
    fn wake_one_releases_a_parked_thread() {
        let set = WaitSet::new();
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                set.park_until(|| ready.load(Ordering::SeqCst).then_some(()));
            });

            while set.waiters() == 0 {
                thread::yield_now();
            }

            ready.store(true, Ordering::SeqCst);
            set.wake_one();
        });

        assert_eq!(set.waiters(), 0);
    }

    #[test]
    fn wake_all_releases_every_thread() {
        let set = WaitSet::new();
        let ready = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    set.park_until(|| ready.load(Ordering::SeqCst).then_some(()));
                });
            }

            while set.waiters() != 4 {
                thread::yield_now();
            }
            // Give the stragglers a moment to actually park.
            thread::sleep(Duration::from_millis(10));

            ready.store(true, Ordering::SeqCst);
            set.wake_all();
        });

        assert_eq!(set.waiters(), 0);
    }
}
