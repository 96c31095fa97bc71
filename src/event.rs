//! Graph-change events and the mutator-to-collector channel
//!
//! Design: fixed-shape event records on a bounded lock-free queue:
//! - Multi-producer: any mutator thread operating on a handle
//! - Single consumer: whichever thread holds the mirror lock
//! - Overflow is loud but survivable (producers spin until admitted)

use core::fmt;
use core::hash::{Hash, Hasher};
use core::ptr::NonNull;

use crossbeam_queue::ArrayQueue;

use crate::handle::Collectable;
use crate::logging::log_queue_full;

/// Queue capacity in events. A full queue warns and retries rather than
/// dropping; it means the collector is not being driven often enough.
pub(crate) const EVENT_QUEUE_CAPACITY: usize = 32_000;

/// Identity of a managed object as carried by events and the mirror.
///
/// Compares and hashes by object address only: the vtable half of the fat
/// pointer is not a stable identity. The fat pointer itself is retained so
/// the sweep can destroy through the most-derived type.
#[derive(Clone, Copy)]
pub struct ObjRef(NonNull<dyn Collectable>);

// SAFETY: ObjRef is an identity, not an access path. `Collectable` requires
// Send + Sync, and the pointee is only ever dropped by the collector worker,
// which holds the sole owning reference via the registry.
unsafe impl Send for ObjRef {}

impl ObjRef {
    #[inline]
    pub(crate) fn new(ptr: NonNull<dyn Collectable>) -> Self {
        Self(ptr)
    }

    /// Address identity, the key into the mirror's node table.
    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.0.as_ptr() as *mut () as usize
    }

    /// Reclaim the object, running the most-derived destructor.
    ///
    /// # Safety
    ///
    /// Must be called at most once per object, with no other owner of the
    /// allocation remaining. The registry-removal step in the sweep is the
    /// single caller.
    pub(crate) unsafe fn reclaim(self) {
        drop(Box::from_raw(self.0.as_ptr()));
    }
}

impl PartialEq for ObjRef {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.addr())
    }
}

/// One graph-change notification from a handle operation.
///
/// AddRoot/RemoveRoot name only the target; Connect/Disconnect name the
/// owning object first and the target second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    AddRoot(ObjRef),
    RemoveRoot(ObjRef),
    Connect { owner: ObjRef, target: ObjRef },
    Disconnect { owner: ObjRef, target: ObjRef },
}

/// Bounded MPSC channel between mutator threads and the collector.
pub(crate) struct EventQueue {
    inner: ArrayQueue<Event>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: ArrayQueue::new(EVENT_QUEUE_CAPACITY),
        }
    }

    /// Enqueue an event, spinning until the queue admits it.
    ///
    /// Never drops: a lost event would desynchronize the mirror from the
    /// real graph permanently.
    pub(crate) fn push(&self, event: Event) {
        let mut event = event;
        while let Err(rejected) = self.inner.push(event) {
            log_queue_full(EVENT_QUEUE_CAPACITY);
            event = rejected;
            std::thread::yield_now();
        }
    }

    /// Non-blocking pop; `None` when the queue is empty.
    #[inline]
    pub(crate) fn pop(&self) -> Option<Event> {
        self.inner.pop()
    }
}
