//! Single-producer, single-consumer bounded queue.
//!
//! The same external contract as [`mpmc`](crate::mpmc), restricted to one
//! sender and one receiver at a time. The engine replaces the admission
//! word with two independent positions, so the hot path needs a single
//! slot CAS per operation.
//!
//! Extra concurrent callers on either side are a contract violation, but
//! they degrade to spurious `Full`/`Empty` results (the slot CAS stays the
//! commit point) rather than corruption - a crowd of blocked senders on a
//! full queue, for instance, parks and is released by `close` like any
//! other waiter.
//!
//! # Example
//!
//! ```
//! use courier::spsc;
//! use std::ptr::NonNull;
//! use std::thread;
//!
//! let queue = spsc::Queue::<u64>::with_capacity(1024).unwrap();
//! let payloads: Vec<u64> = (1..=100).collect();
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         for payload in &payloads {
//!             // Safety: `payloads` outlives the scope and is only read
//!             // through the loaned pointers.
//!             unsafe { queue.send(NonNull::from(payload)).unwrap() };
//!         }
//!     });
//!
//!     for expected in &payloads {
//!         let msg = queue.recv().unwrap();
//!         assert_eq!(unsafe { *msg.as_ref() }, *expected);
//!     }
//! });
//! ```

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

/// A bounded single-producer, single-consumer pointer queue.
///
/// Capacity is fixed at construction (rounded up to a power of two, at
/// most `1 << 30`). Payload lifetime stays with the caller; see the
/// crate-level loan contract.
pub struct Queue<T> {
    engine: Ring<T>,
    /// The receiver parked against emptiness.
    reader: CachePadded<WaitSet>,
    /// The sender parked against fullness.
    writer: CachePadded<WaitSet>,
}

impl<T> Queue<T> {
    /// Creates a queue with at least the requested capacity.
    ///
    /// The capacity is rounded up to the next power of two, with a floor
    /// of 2. Requests above `1 << 30` fail with [`CapacityError`].
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
    /// Returns [`TrySendError::Full`] if the slot at the write position is
    /// still occupied and [`TrySendError::Closed`] if the queue has been
    /// closed.
    ///
    /// # Safety
    ///
    /// Same loan contract as [`mpmc::Queue::try_send`](crate::mpmc::Queue::try_send):
    /// `msg` must stay valid until received, and the payload is off limits
    /// to the sender while on loan.
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
            self.reader.wake_one();
        }
        result
    }

    /// Attempts to receive a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] if the slot at the read position is
    /// empty and [`TryRecvError::Closed`] if the queue has been closed -
    /// closure overrides any remaining occupancy.
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
    /// Identical semantics to [`mpmc::Queue::close`](crate::mpmc::Queue::close):
    /// all subsequent operations fail closed, occupied slots are not
    /// drained, and the call is idempotent.
    pub fn close(&self) {
        {
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
