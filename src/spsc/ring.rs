//! The two-index ring engine backing the SPSC queue.
//!
//! With one producer and one consumer there is no admission word to fight
//! over: the producer owns `write`, the consumer owns `read`, and each
//! side detects fullness or emptiness from the content of the slot at its
//! own position. The slot CAS remains the commit point, so a second
//! concurrent caller on either side loses the CAS and sees a spurious
//! full/empty result instead of corrupting the ring.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::{CapacityError, TryRecvError, TrySendError};

/// Largest supported capacity; positions are 32-bit and free-running.
pub(crate) const MAX_CAPACITY: usize = 1 << 30;

/// Smallest capacity a ring is created with.
pub(crate) const MIN_CAPACITY: usize = 2;

pub(crate) struct Ring<T> {
    /// Producer position, free-running; the slot index is `write & mask`.
    write: CachePadded<AtomicU32>,
    /// Consumer position, free-running.
    read: CachePadded<AtomicU32>,
    /// Monotonic: set once by `mark_closed`, never cleared.
    closed: CachePadded<AtomicBool>,
    /// One pointer per slot; null is the empty-slot sentinel.
    slots: Box<[AtomicPtr<T>]>,
    mask: u32,
    _marker: PhantomData<*mut T>,
}

// Safety: see mpmc::ring - pointer transfer is sound exactly when T: Send.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        if capacity > MAX_CAPACITY {
            return Err(CapacityError);
        }
        let capacity = capacity.next_power_of_two().max(MIN_CAPACITY);

        let slots: Box<[AtomicPtr<T>]> = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        Ok(Self {
            write: CachePadded::new(AtomicU32::new(0)),
            read: CachePadded::new(AtomicU32::new(0)),
            closed: CachePadded::new(AtomicBool::new(false)),
            slots,
            mask: capacity as u32 - 1,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask as usize + 1
    }

    #[inline]
    fn slot(&self, position: u32) -> &AtomicPtr<T> {
        &self.slots[(position & self.mask) as usize]
    }

    /// Current occupancy, derived from the position pair.
    ///
    /// The loads are not one snapshot; loading `write` first keeps the
    /// difference within `[0, capacity]`, clamped when the consumer
    /// overtakes the stale `write` value.
    pub(crate) fn len(&self) -> usize {
        let write = self.write.load(Ordering::SeqCst);
        let read = self.read.load(Ordering::SeqCst);
        let len = write.wrapping_sub(read);
        if len > self.mask.wrapping_add(1) {
            0
        } else {
            len as usize
        }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Publishes `msg` at the write position.
    ///
    /// A non-empty slot there means the ring is full: the consumer has not
    /// come around yet.
    pub(crate) fn try_publish(&self, msg: NonNull<T>) -> Result<(), TrySendError> {
        if self.is_closed() {
            return Err(TrySendError::Closed);
        }

        let position = self.write.load(Ordering::Acquire);
        if self
            .slot(position)
            .compare_exchange(
                ptr::null_mut(),
                msg.as_ptr(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(TrySendError::Full);
        }

        self.write.store(position.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumes the message at the read position, if any.
    pub(crate) fn try_consume(&self) -> Result<NonNull<T>, TryRecvError> {
        if self.is_closed() {
            return Err(TryRecvError::Closed);
        }

        let position = self.read.load(Ordering::Acquire);
        let slot = self.slot(position);

        let Some(msg) = NonNull::new(slot.load(Ordering::SeqCst)) else {
            return Err(TryRecvError::Empty);
        };
        if slot
            .compare_exchange(
                msg.as_ptr(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Lost the observed message to a second caller.
            return Err(TryRecvError::Empty);
        }

        self.read.store(position.wrapping_add(1), Ordering::Release);
        Ok(msg)
    }
}
