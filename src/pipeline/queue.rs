//! Bounded single-producer / single-consumer event queue
//!
//! A fixed ring of `capacity` slots addressed by two indices:
//!
//! - `write` is stored only by the [`Producer`] and published with `Release`
//!   after the slot it exposes has been filled.
//! - `read` is stored only by the [`Consumer`] and published with `Release`
//!   after the slot it frees has been copied out.
//!
//! Each side loads the other's index with `Acquire`, so a slot is never
//! written and read at the same time. One slot is always left empty: the
//! queue is empty when `read == write` and full when advancing `write` would
//! make it equal to `read`.
//!
//! Pushing into a full queue drops the event and bumps a counter. The
//! producer never blocks, allocates or takes a lock.

use super::{Event, PipelineError};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default ring size, matching the firmware build
pub const DEFAULT_CAPACITY: usize = 128;

struct Shared {
    slots: Box<[UnsafeCell<MaybeUninit<Event>>]>,
    mask: usize,
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    dropped: CachePadded<AtomicU64>,
}

// SAFETY: a slot is written only by the producer while it lies outside
// [read, write), and read only by the consumer while it lies inside. The
// Release/Acquire pairs on the two indices order those accesses.
unsafe impl Sync for Shared {}

impl Shared {
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }
}

/// Create a queue with `capacity` slots (`capacity - 1` usable).
///
/// `capacity` must be a power of two of at least 2.
pub fn event_queue(capacity: usize) -> Result<(Producer, Consumer), PipelineError> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(PipelineError::CapacityNotPowerOfTwo(capacity));
    }

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
        dropped: CachePadded::new(AtomicU64::new(0)),
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    ))
}

/// Write half of the queue, owned by the interrupt/callback context
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Enqueue an event.
    ///
    /// Returns `false` and counts a drop when the queue is full; the event is
    /// discarded and nothing already queued is touched.
    #[inline]
    pub fn push(&mut self, event: Event) -> bool {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let next = (write + 1) & shared.mask;

        if next == shared.read.load(Ordering::Acquire) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: `write` is outside [read, write) so the consumer cannot be
        // reading it, and only this producer writes slots.
        unsafe {
            (*shared.slots[write].get()).write(event);
        }
        shared.write.store(next, Ordering::Release);
        true
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read half of the queue, owned by the polling loop
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// Dequeue the oldest event, or `None` if the queue is empty
    #[inline]
    pub fn pop(&mut self) -> Option<Event> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);

        if read == shared.write.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `read` is inside [read, write); the Acquire load above makes
        // the producer's write of this slot visible. `Event` is `Copy`, so
        // reading it out leaves nothing to drop.
        let event = unsafe { (*shared.slots[read].get()).assume_init_read() };
        shared.read.store((read + 1) & shared.mask, Ordering::Release);
        Some(event)
    }

    pub fn is_empty(&self) -> bool {
        self.shared.read.load(Ordering::Relaxed) == self.shared.write.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn probe(&self) -> QueueProbe {
        QueueProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read-only view of queue occupancy and drops, for diagnostics
#[derive(Clone)]
pub struct QueueProbe {
    shared: Arc<Shared>,
}

impl QueueProbe {
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Approximate number of queued events
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }
}
