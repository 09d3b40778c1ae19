//! Multi-producer, multi-consumer bounded queue.
//!
//! Any number of threads may send and receive concurrently. Reservations
//! are linearized through a packed admission word; the lock-free protocol
//! lives in the ring engine. The queue is a single shared handle: loan it to
//! worker threads with [`std::thread::scope`] or wrap it in an
//! [`std::sync::Arc`].
//!
//! # Example
//!
//! ```
//! use courier::mpmc;
//! use std::ptr::NonNull;
//! use std::thread;
//!
//! let queue = mpmc::Queue::<u64>::with_capacity(1024).unwrap();
//! let payloads: Vec<u64> = (0..200).collect();
//!
//! thread::scope(|s| {
//!     let (left, right) = payloads.split_at(100);
//!     for half in [left, right] {
//!         let queue = &queue;
//!         s.spawn(move || {
//!             for payload in half {
//!                 // Safety: `payloads` outlives the scope and is only
//!                 // read through the loaned pointers.
//!                 unsafe { queue.send(NonNull::from(payload)).unwrap() };
//!             }
//!         });
//!     }
//!
//!     let mut sum = 0;
//!     for _ in 0..200 {
//!         let msg = queue.recv().unwrap();
//!         sum += unsafe { *msg.as_ref() };
//!     }
//!     assert_eq!(sum, (0..200).sum());
//! });
//! ```
//!
//! # Ordering
//!
//! Messages from a single producer are received in the order they were
//! sent. Across producers, the order is the order in which the producers
//! won the admission word - first admitted, first out.

mod ring;

use std::fmt;
use std::ptr::NonNull;
use std::thread;

use crossbeam_utils::{Backoff, CachePadded};

use crate::park::WaitSet;
use crate::{CapacityError, Closed, TryRecvError, TrySendError};

use ring::Ring;

/// Snoozes a blocking operation spends on backoff before parking.
const SNOOZE_ITERS: usize = 8;

/// A bounded multi-producer, multi-consumer pointer queue.
///
/// Capacity is fixed at construction (rounded up to a power of two, at
/// most 32 768) and the queue never copies, allocates, or frees a payload:
/// senders loan out non-null pointers and receivers hand them back through
/// whatever completion protocol the caller layers on top, typically a
/// [`Completion`](crate::Completion) marker inside the message.
pub struct Queue<T> {
    engine: Ring<T>,
    /// Receivers parked against emptiness.
    reader: CachePadded<WaitSet>,
    /// Senders parked against fullness.
    writer: CachePadded<WaitSet>,
}

impl<T> Queue<T> {
    /// Creates a queue with at least the requested capacity.
    ///
    /// The capacity is rounded up to the next power of two, with a floor
    /// of 2. Requests above 32 768 fail with [`CapacityError`]: head and
    /// occupancy share a 32-bit admission word in 16-bit halves.
    ///
    /// # Example
    ///
    /// ```
    /// use courier::mpmc;
    ///
    /// let queue = mpmc::Queue::<u64>::with_capacity(100).unwrap();
    /// assert_eq!(queue.capacity(), 128);
    ///
    /// assert!(mpmc::Queue::<u64>::with_capacity(1 << 20).is_err());
    /// ```
    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        Ok(Self {
            engine: Ring::with_capacity(capacity)?,
            reader: CachePadded::new(WaitSet::new()),
            writer: CachePadded::new(WaitSet::new()),
        })
    }

    /// Returns the fixed capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.engine.capacity()
    }

    /// Returns the number of messages currently in the queue.
    ///
    /// A snapshot that may be stale in concurrent contexts; it never
    /// exceeds [`capacity`](Queue::capacity).
    #[inline]
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Returns `true` if the queue holds no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the queue has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Attempts to send a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TrySendError::Full`] if every slot is occupied and
    /// [`TrySendError::Closed`] if the queue has been closed.
    ///
    /// # Safety
    ///
    /// `msg` must point to a live `T` that remains valid until the message
    /// is received. From a successful send until the receiver completes
    /// the handover, the payload is on loan: the caller must not access
    /// it, except through fields designed for concurrent access (atomics).
    #[inline]
    pub unsafe fn try_send(&self, msg: NonNull<T>) -> Result<(), TrySendError> {
        let result = self.engine.try_publish(msg);
        if result.is_ok() {
            self.reader.wake_one();
        }
        result
    }

    /// Sends a message, parking the caller while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the queue is, or becomes, closed.
    ///
    /// # Safety
    ///
    /// Same loan contract as [`try_send`](Queue::try_send).
    pub unsafe fn send(&self, msg: NonNull<T>) -> Result<(), Closed> {
        match self.engine.try_publish(msg) {
            Ok(()) => {
                self.reader.wake_one();
                return Ok(());
            }
            Err(TrySendError::Closed) => return Err(Closed),
            Err(TrySendError::Full) => {}
        }

        // Backoff phase: space often frees up within a few snoozes,
        // cheaper than a park/unpark round trip.
        let backoff = Backoff::new();
        for _ in 0..SNOOZE_ITERS {
            backoff.snooze();
            match self.engine.try_publish(msg) {
                Ok(()) => {
                    self.reader.wake_one();
                    return Ok(());
                }
                Err(TrySendError::Closed) => return Err(Closed),
                Err(TrySendError::Full) => {}
            }
        }

        let result = self.writer.park_until(|| match self.engine.try_publish(msg) {
            Ok(()) => Some(Ok(())),
            Err(TrySendError::Closed) => Some(Err(Closed)),
            Err(TrySendError::Full) => None,
        });
        if result.is_ok() {
            // Wake after the writer lock is released; a woken reader takes
            // only the reader lock, so the two sides never nest locks.
            self.reader.wake_one();
        }
        result
    }

    /// Attempts to receive a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] if no message is published and
    /// [`TryRecvError::Closed`] if the queue has been closed - closure
    /// overrides any remaining occupancy.
    #[inline]
    pub fn try_recv(&self) -> Result<NonNull<T>, TryRecvError> {
        let result = self.engine.try_consume();
        if result.is_ok() {
            self.writer.wake_one();
        }
        result
    }

    /// Receives a message, parking the caller while the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the queue is, or becomes, closed.
    pub fn recv(&self) -> Result<NonNull<T>, Closed> {
        match self.engine.try_consume() {
            Ok(msg) => {
                self.writer.wake_one();
                return Ok(msg);
            }
            Err(TryRecvError::Closed) => return Err(Closed),
            Err(TryRecvError::Empty) => {}
        }

        let backoff = Backoff::new();
        for _ in 0..SNOOZE_ITERS {
            backoff.snooze();
            match self.engine.try_consume() {
                Ok(msg) => {
                    self.writer.wake_one();
                    return Ok(msg);
                }
                Err(TryRecvError::Closed) => return Err(Closed),
                Err(TryRecvError::Empty) => {}
            }
        }

        let result = self.reader.park_until(|| match self.engine.try_consume() {
            Ok(msg) => Some(Ok(msg)),
            Err(TryRecvError::Closed) => Some(Err(Closed)),
            Err(TryRecvError::Empty) => None,
        });
        if result.is_ok() {
            self.writer.wake_one();
        }
        result
    }

    /// Closes the queue and waits for every parked thread to leave.
    ///
    /// After `close` returns, every send and every receive - blocking or
    /// not - fails with the closed error, including receives of messages
    /// still occupying slots; callers who need the stragglers must drain
    /// before closing. Closure is monotonic and `close` is idempotent.
    ///
    /// Messages left in the queue are not released: payload lifetime is
    /// the caller's responsibility.
    pub fn close(&self) {
        {
            // Both wait-set locks, reader first: nobody can register,
            // re-attempt, and park without observing the flag afterwards.
            let _reader = self.reader.lock();
            let _writer = self.writer.lock();
            self.engine.mark_closed();
        }

        while self.reader.waiters() != 0 || self.writer.waiters() != 0 {
            self.reader.wake_all();
            self.writer.wake_all();
            thread::yield_now();
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tag(value: usize) -> NonNull<u64> {
        // Opaque message identity; never dereferenced.
        NonNull::new(value as *mut u64).unwrap()
    }

    #[test]
    fn send_recv_preserves_order() {
        let queue = Queue::<u64>::with_capacity(8).unwrap();

        for value in 1..=3 {
            unsafe { queue.try_send(tag(value)).unwrap() };
        }

        for value in 1..=3 {
            assert_eq!(queue.try_recv().unwrap(), tag(value));
        }
        assert_eq!(queue.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn try_send_succeeds_capacity_times_then_blocks() {
        let queue = Queue::<u64>::with_capacity(4).unwrap();

        for value in 1..=4 {
            unsafe { queue.try_send(tag(value)).unwrap() };
        }
        assert_eq!(
            unsafe { queue.try_send(tag(5)) },
            Err(TrySendError::Full)
        );
        assert_eq!(queue.len(), queue.capacity());
    }

    #[test]
    fn closed_queue_fails_every_operation() {
        let queue = Queue::<u64>::with_capacity(4).unwrap();
        unsafe { queue.try_send(tag(1)).unwrap() };

        queue.close();

        assert!(queue.is_closed());
        assert_eq!(unsafe { queue.try_send(tag(2)) }, Err(TrySendError::Closed));
        assert_eq!(unsafe { queue.send(tag(2)) }, Err(Closed));
        // Closure overrides the one message still occupying a slot.
        assert_eq!(queue.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(queue.recv(), Err(Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let queue = Queue::<u64>::with_capacity(2).unwrap();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[test]
    fn blocking_send_unparks_on_recv() {
        let queue = Queue::<u64>::with_capacity(2).unwrap();
        unsafe {
            queue.try_send(tag(1)).unwrap();
            queue.try_send(tag(2)).unwrap();
        }

        thread::scope(|s| {
            let sender = s.spawn(|| unsafe { queue.send(tag(3)) });

            // Let the sender run out of snoozes and park.
            thread::sleep(Duration::from_millis(50));
            assert_eq!(queue.try_recv().unwrap(), tag(1));

            sender.join().unwrap().unwrap();
        });

        assert_eq!(queue.try_recv().unwrap(), tag(2));
        assert_eq!(queue.try_recv().unwrap(), tag(3));
    }

    #[test]
    fn blocking_recv_unparks_on_send() {
        let queue = Queue::<u64>::with_capacity(2).unwrap();

        thread::scope(|s| {
            // NonNull<T> isn't Send, so hand the address across the join
            // instead of the pointer itself.
            let receiver = s.spawn(|| queue.recv().map(|msg| msg.as_ptr() as usize));

            thread::sleep(Duration::from_millis(50));
            unsafe { queue.try_send(tag(9)).unwrap() };

            let addr = receiver.join().unwrap().unwrap();
            assert_eq!(NonNull::new(addr as *mut u64).unwrap(), tag(9));
        });
    }

    #[test]
    fn close_releases_parked_receivers() {
        let queue = Queue::<u64>::with_capacity(2).unwrap();

        thread::scope(|s| {
            // NonNull<T> isn't Send, so hand the address across the join
            // instead of the pointer itself.
            let receivers: Vec<_> = (0..2)
                .map(|_| s.spawn(|| queue.recv().map(|msg| msg.as_ptr() as usize)))
                .collect();

            thread::sleep(Duration::from_millis(50));
            queue.close();

            for receiver in receivers {
                assert_eq!(receiver.join().unwrap(), Err(Closed));
            }
        });
    }

    #[test]
    fn close_releases_parked_senders() {
        let queue = Queue::<u64>::with_capacity(2).unwrap();
        unsafe {
            queue.try_send(tag(1)).unwrap();
            queue.try_send(tag(2)).unwrap();
        }

        thread::scope(|s| {
            let senders: Vec<_> = (0..2)
                .map(|i| {
                    let queue = &queue;
                    s.spawn(move || unsafe { queue.send(tag(10 + i)) })
                })
                .collect();

            thread::sleep(Duration::from_millis(50));
            queue.close();

            for sender in senders {
                assert_eq!(sender.join().unwrap(), Err(Closed));
            }
        });
    }

    #[test]
    fn per_producer_order_is_preserved() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let queue = Queue::<u64>::with_capacity(64).unwrap();
        let received = std::sync::Mutex::new(Vec::new());

        thread::scope(|s| {
            for producer in 0..PRODUCERS {
                let queue = &queue;
                s.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let value = (producer << 32) | (seq + 1);
                        while unsafe { queue.try_send(tag(value)).is_err() } {
                            std::hint::spin_loop();
                        }
                    }
                });
            }

            let mut seen = Vec::with_capacity(PRODUCERS * PER_PRODUCER);
            while seen.len() < PRODUCERS * PER_PRODUCER {
                match queue.try_recv() {
                    Ok(msg) => seen.push(msg.as_ptr() as usize),
                    Err(TryRecvError::Empty) => std::hint::spin_loop(),
                    Err(TryRecvError::Closed) => unreachable!(),
                }
            }
            *received.lock().unwrap() = seen;
        });

        let received = received.into_inner().unwrap();
        let mut last = [0usize; PRODUCERS];
        for value in received {
            let producer = value >> 32;
            let seq = value & 0xffff_ffff;
            assert!(seq > last[producer], "producer {producer} reordered");
            last[producer] = seq;
        }
    }

    #[test]
    fn concurrent_multiset_is_preserved() {
        const PRODUCERS: usize = 3;
        const CONSUMERS: usize = 3;
        const PER_PRODUCER: usize = 10_000;

        let queue = Queue::<u64>::with_capacity(128).unwrap();
        let received = AtomicUsize::new(0);
        let collected = std::sync::Mutex::new(HashSet::new());

        thread::scope(|s| {
            for producer in 0..PRODUCERS {
                let queue = &queue;
                s.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let value = producer * PER_PRODUCER + seq + 1;
                        unsafe { queue.send(tag(value)).unwrap() };
                    }
                });
            }

            for _ in 0..CONSUMERS {
                s.spawn(|| {
                    // Claim receive tickets so exactly one recv runs per
                    // message and no consumer parks past the last one.
                    let mut local = Vec::new();
                    while received.fetch_add(1, Ordering::SeqCst) < PRODUCERS * PER_PRODUCER {
                        match queue.recv() {
                            Ok(msg) => local.push(msg.as_ptr() as usize),
                            Err(Closed) => break,
                        }
                    }
                    collected.lock().unwrap().extend(local);
                });
            }
        });

        let collected = collected.into_inner().unwrap();
        assert_eq!(collected.len(), PRODUCERS * PER_PRODUCER);
        assert!((1..=PRODUCERS * PER_PRODUCER).all(|v| collected.contains(&v)));
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let queue = Queue::<u64>::with_capacity(4).unwrap();

        for lap in 0..8 {
            for i in 0..4 {
                unsafe { queue.try_send(tag(lap * 4 + i + 1)).unwrap() };
                assert!(queue.len() <= queue.capacity());
            }
            assert_eq!(unsafe { queue.try_send(tag(99)) }, Err(TrySendError::Full));
            for _ in 0..4 {
                queue.try_recv().unwrap();
            }
        }
    }
}
