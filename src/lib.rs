//! Bounded pointer-passing message queues for cooperating threads.
//!
//! `courier` moves work between threads in the same address space without
//! copying it: the sender hands over a [`NonNull`](std::ptr::NonNull)
//! reference to a payload it owns, the receiver processes the payload in
//! place, and the sender is optionally told when processing has finished.
//! The queues never allocate, copy, or free a payload - its lifetime stays
//! with the caller.
//!
//! # Quick Start
//!
//! ```
//! use courier::mpmc;
//! use std::ptr::NonNull;
//!
//! let queue = mpmc::Queue::<u64>::with_capacity(8).unwrap();
//!
//! let mut payload = 42u64;
//! let msg = NonNull::from(&mut payload);
//!
//! // Safety: `payload` stays alive and untouched until it is received.
//! unsafe { queue.try_send(msg).unwrap() };
//!
//! let received = queue.try_recv().unwrap();
//! assert_eq!(received, msg);
//! assert_eq!(unsafe { *received.as_ref() }, 42);
//! ```
//!
//! # Queue variants
//!
//! Two engines implement the same send/receive contract:
//!
//! - [`mpmc::Queue`]: any number of concurrent senders and receivers,
//!   linearized through a packed admission word.
//! - [`spsc::Queue`]: one sender and one receiver at a time. Faster because
//!   it synchronizes less shared state; extra concurrent callers degrade to
//!   spurious `Full`/`Empty` results rather than corruption.
//!
//! Both offer non-blocking (`try_send`/`try_recv`) and blocking
//! (`send`/`recv`) forms, a monotonic [`close`](mpmc::Queue::close)
//! handshake that releases every parked thread, and fixed power-of-two
//! capacities chosen at construction.
//!
//! # Completion handover
//!
//! A sender that needs to know when its payload has been processed embeds a
//! [`Completion`] in the message and attaches a [`Signal`]:
//!
//! ```
//! use courier::{Completion, Signal};
//! use std::sync::Arc;
//!
//! let signal = Arc::new(Signal::new());
//! let done = Completion::new(Some(Arc::clone(&signal)));
//!
//! // ... receiver side, after processing the payload in place:
//! done.mark_processed();
//!
//! // ... sender side:
//! signal.wait();
//! assert!(done.is_processed());
//! ```
//!
//! # The loan contract
//!
//! Sending is `unsafe`: the queue transports a raw pointer and cannot prove
//! the payload outlives the transfer. From a successful send until the
//! receiver finishes with the message (typically announced through
//! [`Completion::mark_processed`]), the payload is on loan - the sender must
//! not touch it, and fields the receiver writes while the sender may still
//! look at them belong in atomics.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use core::fmt;

mod completion;
mod park;
mod signal;

pub mod mpmc;
pub mod spsc;

pub use completion::Completion;
pub use signal::Signal;

/// Error returned when a non-blocking send cannot publish its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError {
    /// Every slot of the queue is occupied.
    Full,
    /// The queue has been closed.
    Closed,
}

impl TrySendError {
    /// Returns `true` if this error is the `Full` variant.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Returns `true` if this error is the `Closed` variant.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TrySendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue is full"),
            Self::Closed => write!(f, "queue is closed"),
        }
    }
}

impl std::error::Error for TrySendError {}

/// Error returned when a non-blocking receive has no message to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// No message is currently published.
    Empty,
    /// The queue has been closed.
    ///
    /// Closure overrides occupancy: a closed queue reports `Closed` even
    /// while unconsumed messages remain in its slots.
    Closed,
}

impl TryRecvError {
    /// Returns `true` if this error is the `Empty` variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` if this error is the `Closed` variant.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "queue is empty"),
            Self::Closed => write!(f, "queue is closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}

/// Error returned by the blocking operations once a queue is closed.
///
/// Closure is the only condition that fails a blocking send or receive; a
/// full or empty queue parks the caller instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is closed")
    }
}

impl std::error::Error for Closed {}

/// Error returned when a requested queue capacity cannot be represented.
///
/// Capacities round up to the next power of two; requests above the
/// variant's ceiling (see [`mpmc::Queue::with_capacity`] and
/// [`spsc::Queue::with_capacity`]) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError;

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capacity exceeds the supported maximum")
    }
}

impl std::error::Error for CapacityError {}
