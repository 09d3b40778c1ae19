//! The admission-word ring engine backing the MPMC queue.
//!
//! A fixed ring of pointer slots is governed by one packed 32-bit word,
//! `(head:16 | occupancy:16)`, the linearization point of every publish and
//! consume. Producers first reserve a slot privately (null -> message CAS on
//! the slot itself) and only then admit it publicly (occupancy increment on
//! the word); consumers claim in the opposite order (head advance on the
//! word, then swap the slot back to null). The slot-content CAS keeps two
//! producers from ever holding the same slot, so the word may be retried
//! freely under contention.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::{CapacityError, TryRecvError, TrySendError};

/// Largest supported capacity.
///
/// Head and occupancy share a 32-bit word in 16-bit halves, and occupancy
/// must be able to reach the capacity itself.
pub(crate) const MAX_CAPACITY: usize = 1 << 15;

/// Smallest capacity a ring is created with.
pub(crate) const MIN_CAPACITY: usize = 2;

#[inline]
fn pack(head: u32, occupancy: u32) -> u32 {
    (head << 16) | occupancy
}

#[inline]
fn unpack(word: u32) -> (u32, u32) {
    (word >> 16, word & 0xffff)
}

pub(crate) struct Ring<T> {
    /// Packed (head:16 | occupancy:16) admission word.
    admission: CachePadded<AtomicU32>,
    /// Monotonic: set once by `mark_closed`, never cleared.
    closed: CachePadded<AtomicBool>,
    /// One pointer per slot; null is the empty-slot sentinel.
    slots: Box<[AtomicPtr<T>]>,
    mask: u32,
    _marker: PhantomData<*mut T>,
}

// Safety: the ring stores raw pointers to T and hands them to other
// threads, which is a transfer of the pointed-to payload. Sound exactly
// when T itself is Send.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    /// Allocates a ring, rounding the capacity up to the next power of two
    /// with a floor of [`MIN_CAPACITY`].
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        if capacity > MAX_CAPACITY {
            return Err(CapacityError);
        }
        let capacity = capacity.next_power_of_two().max(MIN_CAPACITY);

        let slots: Box<[AtomicPtr<T>]> = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        Ok(Self {
            admission: CachePadded::new(AtomicU32::new(0)),
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
    fn slot(&self, index: u32) -> &AtomicPtr<T> {
        &self.slots[(index & self.mask) as usize]
    }

    /// Current occupancy. A snapshot that may be stale by the time the
    /// caller looks at it.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let (_, occupancy) = unpack(self.admission.load(Ordering::SeqCst));
        occupancy as usize
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Publishes `msg` into the ring.
    ///
    /// Reserve-then-admit: the slot at `head + occupancy` is taken with a
    /// null -> msg CAS before the occupancy increment makes it visible to
    /// consumers. Either CAS losing means another thread moved the queue
    /// on; the loop reloads and retries until the ring is full or closed.
    pub(crate) fn try_publish(&self, msg: NonNull<T>) -> Result<(), TrySendError> {
        let backoff = Backoff::new();
        loop {
            let word = self.admission.load(Ordering::SeqCst);
            if self.is_closed() {
                return Err(TrySendError::Closed);
            }
            let (head, occupancy) = unpack(word);
            if occupancy as usize >= self.capacity() {
                return Err(TrySendError::Full);
            }

            let slot = self.slot(head.wrapping_add(occupancy));
            if slot
                .compare_exchange(
                    ptr::null_mut(),
                    msg.as_ptr(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
            {
                // Slot still holds an unconsumed message from an earlier
                // lap, or another producer reserved it first.
                backoff.spin();
                continue;
            }

            if self
                .admission
                .compare_exchange(
                    word,
                    pack(head, occupancy + 1),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return Ok(());
            }

            // Lost the admission race: take the reservation back before
            // retrying. A failed take-back means a consumer already swapped
            // the message out under a racing lap, i.e. it was delivered.
            if slot
                .compare_exchange(
                    msg.as_ptr(),
                    ptr::null_mut(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
            {
                return Ok(());
            }
            backoff.spin();
        }
    }

    /// Consumes the oldest admitted message.
    ///
    /// Claim-then-drain: advancing the admission word makes the former head
    /// slot ours alone; the swap to null then collects the message. The
    /// publisher's slot CAS precedes its occupancy increment, so the slot
    /// is already populated or becomes so momentarily under a racing lap -
    /// the inner loop rides that window out.
    pub(crate) fn try_consume(&self) -> Result<NonNull<T>, TryRecvError> {
        let backoff = Backoff::new();
        loop {
            let word = self.admission.load(Ordering::SeqCst);
            if self.is_closed() {
                return Err(TryRecvError::Closed);
            }
            let (head, occupancy) = unpack(word);
            if occupancy == 0 {
                return Err(TryRecvError::Empty);
            }

            let next = pack(head.wrapping_add(1) & self.mask, occupancy - 1);
            if self
                .admission
                .compare_exchange(word, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                backoff.spin();
                continue;
            }

            let slot = self.slot(head);
            let spin = Backoff::new();
            loop {
                if let Some(msg) = NonNull::new(slot.swap(ptr::null_mut(), Ordering::SeqCst)) {
                    return Ok(msg);
                }
                spin.snooze();
            }
        }
    }
}
