//! Completion markers embedded in user messages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::Signal;

/// A completion marker carried inside a message.
///
/// The sender embeds a `Completion` in its message (typically as the first
/// field), optionally attaching a shared [`Signal`]. When the receiver is
/// done with the payload it calls
/// [`mark_processed`](Completion::mark_processed), which flips the
/// processed flag forward and fires the attached signal. The sender
/// observes the handover through [`is_processed`](Completion::is_processed)
/// or by waiting on the signal, after which the payload is its own again.
///
/// One signal may be shared across many markers to collect a whole batch:
/// the signal's count then tells the sender how many messages have been
/// processed so far.
///
/// # Example
///
/// ```
/// use courier::{Completion, Signal};
/// use std::sync::Arc;
///
/// let signal = Arc::new(Signal::new());
/// let done = Completion::new(Some(Arc::clone(&signal)));
///
/// assert!(!done.is_processed());
///
/// done.mark_processed();
///
/// assert!(done.is_processed());
/// assert_eq!(signal.count(), 1);
/// ```
pub struct Completion {
    signal: Option<Arc<Signal>>,
    processed: AtomicBool,
}

impl Completion {
    /// Creates an unprocessed marker, optionally attached to a signal.
    pub fn new(signal: Option<Arc<Signal>>) -> Self {
        Self {
            signal,
            processed: AtomicBool::new(false),
        }
    }

    /// Returns the attached signal, if any.
    pub fn attached(&self) -> Option<&Arc<Signal>> {
        self.signal.as_ref()
    }

    /// Returns `true` once the receiver has marked the message processed.
    ///
    /// The load is `Acquire`: a `true` result makes every write the
    /// receiver performed before marking visible to the caller.
    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::Acquire)
    }

    /// Marks the message as processed and fires the attached signal.
    ///
    /// The flag only moves forward; calling this twice leaves it set. The
    /// attached signal is fired on every call, so batch protocols that
    /// count fires must mark each message exactly once.
    pub fn mark_processed(&self) {
        self.processed.store(true, Ordering::Release);
        if let Some(signal) = &self.signal {
            signal.fire();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("processed", &self.is_processed())
            .field("attached", &self.signal.is_some())
            .finish()
    }
}
