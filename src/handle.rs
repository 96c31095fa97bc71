//! Root and edge handles - the only legal mutators of the mirrored graph
//!
//! Design: RAII event emission:
//! - `Root<T>` pins its referent as a GC root for the handle's lifetime
//! - `Edge<T>` represents one edge inside a managed object
//! - Every construct/assign/drop emits exactly the events the collector
//!   replays; dropping an `Edge` inside a sweep emits nothing

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::collector;
use crate::event::ObjRef;

/// Marker trait for objects whose lifetime is governed by the collector.
///
/// The `Send + Sync` bounds exist because managed objects are shared across
/// mutator threads through [`Root`] handles and destroyed on the collector
/// worker. The trait object's drop glue is what tears down the most-derived
/// type on sweep.
pub trait Collectable: Send + Sync + 'static {}

/// Identity token for the object an [`Edge`] is embedded in.
///
/// Only obtainable inside [`Root::new_with`]'s initializer, which is the one
/// place the containing object's identity exists before the object does.
#[derive(Clone, Copy, Debug)]
pub struct Owner(ObjRef);

/// Stack-rooted handle. Holding one guarantees the referent survives any
/// `collect`; a "null" root is spelled `Option<Root<T>>`.
///
/// Construction and cloning emit AddRoot; dropping emits RemoveRoot. Plain
/// assignment therefore emits exactly the RemoveRoot(old) + AddRoot(new)
/// pair the protocol requires.
pub struct Root<T: Collectable> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

// SAFETY: a Root is a shared reference to the managed object plus a root
// count contribution. Collectable already requires the pointee to be
// Send + Sync, and the root count is maintained through the event queue,
// which is thread-safe.
unsafe impl<T: Collectable> Send for Root<T> {}
unsafe impl<T: Collectable> Sync for Root<T> {}

impl<T: Collectable> Root<T> {
    /// Move `value` into collector custody and root it.
    pub fn new(value: T) -> Self {
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(value))) };
        collector::add_root(ObjRef::new(ptr));
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Like [`Root::new`], but hands the initializer the not-yet-initialized
    /// object's identity so embedded [`Edge`]s can name their owner.
    ///
    /// ```
    /// use parking_lot::Mutex;
    /// use tracegc::{Collectable, Edge, Root};
    ///
    /// struct Node {
    ///     next: Mutex<Edge<Node>>,
    /// }
    /// impl Collectable for Node {}
    ///
    /// let node = Root::new_with(|owner| Node {
    ///     next: Mutex::new(Edge::new(owner)),
    /// });
    /// assert!(node.next.lock().is_null());
    /// ```
    pub fn new_with(init: impl FnOnce(Owner) -> T) -> Self {
        struct FreeOnUnwind<T>(*mut MaybeUninit<T>);
        impl<T> Drop for FreeOnUnwind<T> {
            fn drop(&mut self) {
                // The slot is still uninitialized here; freeing it must not
                // run T's destructor.
                // SAFETY: we are the sole owner of the allocation.
                unsafe { drop(Box::from_raw(self.0)) };
            }
        }

        let raw: *mut MaybeUninit<T> = Box::into_raw(Box::new(MaybeUninit::uninit()));
        let guard = FreeOnUnwind(raw);
        // SAFETY: Box::into_raw never returns null. Forming the pointer to
        // the uninitialized slot is fine; nothing dereferences it until the
        // value is written below.
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<T>()) };

        // Edges built by `init` emit Connect(owner, _) before our AddRoot;
        // replay creates the owner's node on first mention, so the order is
        // harmless. If `init` unwinds, those edges are dropped on the way
        // out and emit the matching Disconnects.
        let value = init(Owner(ObjRef::new(ptr)));
        core::mem::forget(guard);
        // SAFETY: the slot is allocated for exactly one T and not yet
        // initialized.
        unsafe { ptr.as_ptr().write(value) };

        collector::add_root(ObjRef::new(ptr));
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Root an object already known to the mirror (edge targets).
    pub(crate) fn from_target(ptr: NonNull<T>) -> Self {
        collector::add_root(ObjRef::new(ptr));
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn target(&self) -> NonNull<T> {
        self.ptr
    }

    #[inline]
    pub(crate) fn obj_ref(&self) -> ObjRef {
        ObjRef::new(self.ptr)
    }
}

impl<T: Collectable> Clone for Root<T> {
    #[inline]
    fn clone(&self) -> Self {
        collector::add_root(self.obj_ref());
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Same target: emitting the AddRoot/RemoveRoot pair would be
        // correct but pointless churn on the queue.
        if self.ptr != source.ptr {
            *self = source.clone();
        }
    }
}

impl<T: Collectable> Drop for Root<T> {
    #[inline]
    fn drop(&mut self) {
        // Always legal: the collector worker never destroys a Root itself.
        collector::remove_root(self.obj_ref());
    }
}

impl<T: Collectable> Deref for Root<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the AddRoot emitted at construction is drained before any
        // trace, and the matching RemoveRoot is only emitted on drop, so the
        // referent's root count stays positive for this handle's lifetime
        // and no sweep can reclaim it.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Collectable> PartialEq for Root<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: Collectable> Eq for Root<T> {}

impl<T: Collectable> PartialOrd for Root<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Collectable> Ord for Root<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ptr.as_ptr() as usize).cmp(&(other.ptr.as_ptr() as usize))
    }
}

impl<T: Collectable> Hash for Root<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.ptr.as_ptr() as usize).hash(state);
    }
}

impl<T: Collectable> fmt::Debug for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({:p})", self.ptr)
    }
}

/// Member-style handle: one edge of the reference graph, embedded inside a
/// managed object and permanently bound to it as owner.
///
/// Assignment emits Disconnect(owner, old) then Connect(owner, new) when the
/// target actually changes. Dropping emits Disconnect - unless the current
/// thread is the collector worker sweeping, in which case the edge dies
/// silently with its owner.
///
/// Mutation takes `&mut self`; objects shared through [`Root`]'s `Deref`
/// wrap their edges in a lock (see the crate-level example).
pub struct Edge<T: Collectable> {
    owner: ObjRef,
    target: Option<NonNull<T>>,
}

// SAFETY: Edge is embedded in managed objects, which Collectable requires to
// be Send + Sync. All mutation goes through &mut; shared access only reads
// addresses or enqueues events on the thread-safe queue.
unsafe impl<T: Collectable> Send for Edge<T> {}
unsafe impl<T: Collectable> Sync for Edge<T> {}

impl<T: Collectable> Edge<T> {
    /// Null edge. Emits nothing.
    pub fn new(owner: Owner) -> Self {
        Self {
            owner: owner.0,
            target: None,
        }
    }

    /// Edge already pointing at `target`. Emits Connect.
    pub fn with_target(owner: Owner, target: &Root<T>) -> Self {
        collector::connect(owner.0, target.obj_ref());
        Self {
            owner: owner.0,
            target: Some(target.target()),
        }
    }

    /// Point this edge at `target`, emitting the Disconnect/Connect pair
    /// when the target differs.
    pub fn set(&mut self, target: &Root<T>) {
        if self.target == Some(target.target()) {
            return;
        }
        self.release();
        self.target = Some(target.target());
        collector::connect(self.owner, target.obj_ref());
    }

    /// Null this edge, emitting Disconnect for the old target.
    pub fn clear(&mut self) {
        self.release();
        self.target = None;
    }

    /// Assign from another edge of the same owner.
    pub fn copy_from(&mut self, other: &Edge<T>) {
        assert!(
            self.owner == other.owner,
            "edge assignment across different owners"
        );
        if self.target == other.target {
            return;
        }
        self.release();
        self.target = other.target;
        if let Some(ptr) = self.target {
            collector::connect(self.owner, ObjRef::new(ptr));
        }
    }

    /// Produce a fresh [`Root`] for the target, emitting AddRoot.
    pub fn to_root(&self) -> Option<Root<T>> {
        self.target.map(Root::from_target)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    #[inline]
    fn target_addr(&self) -> usize {
        self.target.map_or(0, |ptr| ptr.as_ptr() as usize)
    }

    /// Emit Disconnect for the current target, if any.
    fn release(&mut self) {
        if let Some(ptr) = self.target {
            collector::disconnect(self.owner, ObjRef::new(ptr));
        }
    }
}

impl<T: Collectable> Drop for Edge<T> {
    fn drop(&mut self) {
        // Inside a sweep this edge's owner is being destroyed; the edge is
        // logically gone with it, and its owner's node has already left the
        // mirror.
        if collector::in_collector() {
            return;
        }
        self.release();
    }
}

impl<T: Collectable> PartialEq for Edge<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl<T: Collectable> Eq for Edge<T> {}

impl<T: Collectable> PartialOrd for Edge<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Collectable> Ord for Edge<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.target_addr().cmp(&other.target_addr())
    }
}

impl<T: Collectable> fmt::Debug for Edge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            Some(ptr) => write!(f, "Edge({:p})", ptr),
            None => f.write_str("Edge(null)"),
        }
    }
}
