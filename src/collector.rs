//! Collector engine - event replay, mark-sweep tracing, reclamation
//!
//! Design: a process-wide singleton in three parts:
//! 1. Lock-free event intake (mutator threads pay only an enqueue)
//! 2. A mirror of the reference graph, rebuilt deterministically from
//!    events under one mutex
//! 3. A stamp-based mark-sweep pass over the mirror, run by a single
//!    collector worker, that reclaims whatever no root reaches

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::event::{Event, EventQueue, ObjRef};
use crate::logging::{log_gc_complete, log_gc_mark, log_gc_start, log_gc_sweep};

/// Global collector state (lock-free intake + one mirror mutex).
static COLLECTOR: Lazy<Collector> = Lazy::new(Collector::new);

thread_local! {
    /// True while this thread is inside `collect`. Edge destructors consult
    /// it so that objects torn down by the sweep emit no Disconnects.
    static IN_COLLECTOR: Cell<bool> = Cell::new(false);
}

/// One managed object as the mirror knows it.
///
/// `obj` is `Some` iff the object is in the registry (first observed via
/// AddRoot); the retained identity is what the sweep reclaims through.
/// Entries with `obj == None` exist only for objects mentioned as a Connect
/// owner before their AddRoot drained; they are never destroyed.
#[derive(Default)]
struct Node {
    obj: Option<ObjRef>,
    /// Outbound edges as target addresses. Multiset: duplicates are real
    /// and each needs its own Disconnect.
    edges: Vec<usize>,
    /// Live Root handles on this object.
    root_count: u32,
    /// Matches the mirror's sequence iff reached in the current trace.
    stamp: u64,
}

/// The collector's private copy of the reference graph.
struct Mirror {
    nodes: HashMap<usize, Node>,
    sequence: u64,
    /// Set by any replayed event; a trace only runs when the graph changed.
    dirty: bool,
}

struct Collector {
    events: EventQueue,
    mirror: Mutex<Mirror>,

    // Statistics (lock-free reads for `stats`)
    registered_objects: AtomicUsize,
    reachable_objects: AtomicUsize,
    objects_swept: AtomicUsize,
    collections_run: AtomicUsize,
}

impl Collector {
    fn new() -> Self {
        Self {
            events: EventQueue::new(),
            mirror: Mutex::new(Mirror {
                nodes: HashMap::with_capacity(1024),
                sequence: 0,
                dirty: false,
            }),
            registered_objects: AtomicUsize::new(0),
            reachable_objects: AtomicUsize::new(0),
            objects_swept: AtomicUsize::new(0),
            collections_run: AtomicUsize::new(0),
        }
    }

    /// Replay every pending event into the mirror. Cheap when the queue is
    /// empty; caller must hold the mirror lock.
    fn drain(&self, mirror: &mut Mirror) {
        while let Some(event) = self.events.pop() {
            mirror.dirty = true;
            match event {
                Event::AddRoot(obj) => {
                    let node = mirror.nodes.entry(obj.addr()).or_default();
                    if node.obj.is_none() {
                        node.obj = Some(obj);
                        self.registered_objects.fetch_add(1, Ordering::Relaxed);
                    }
                    node.root_count += 1;
                }
                Event::RemoveRoot(obj) => {
                    let Some(node) = mirror.nodes.get_mut(&obj.addr()) else {
                        panic!(
                            "contract violation: RemoveRoot for unknown object {:#x}",
                            obj.addr()
                        );
                    };
                    // Root count must stay nonnegative.
                    assert!(
                        node.root_count > 0,
                        "contract violation: root count underflow on {:#x}",
                        obj.addr()
                    );
                    node.root_count -= 1;
                }
                Event::Connect { owner, target } => {
                    mirror
                        .nodes
                        .entry(owner.addr())
                        .or_default()
                        .edges
                        .push(target.addr());
                }
                Event::Disconnect { owner, target } => {
                    let node = mirror.nodes.get_mut(&owner.addr());
                    // The edge must exist: a Disconnect with no matching
                    // Connect means the handle protocol was bypassed.
                    let Some(node) = node else {
                        panic!(
                            "contract violation: Disconnect from unknown owner {:#x}",
                            owner.addr()
                        );
                    };
                    let index = node
                        .edges
                        .iter()
                        .position(|&addr| addr == target.addr())
                        .unwrap_or_else(|| {
                            panic!(
                                "contract violation: Disconnect of absent edge {:#x} -> {:#x}",
                                owner.addr(),
                                target.addr()
                            )
                        });
                    node.edges.remove(index);
                }
            }
        }
    }

    /// Trace from roots and reclaim everything unreached. Caller must hold
    /// the mirror lock and have the in-collector flag set.
    fn trace_and_sweep(&self, mirror: &mut Mirror) {
        let started = Instant::now();
        log_gc_start(self.registered_objects.load(Ordering::Relaxed));

        mirror.sequence += 1;
        let sequence = mirror.sequence;

        // Seed with every rooted object.
        let mut stack: Vec<usize> = mirror
            .nodes
            .iter()
            .filter(|(_, node)| node.root_count > 0)
            .map(|(&addr, _)| addr)
            .collect();

        // Mark depth-first. A duplicate edge costs one push and one stamp
        // comparison. Addresses the mirror has no node for are skipped;
        // their AddRoot has not drained yet, so they cannot be swept either.
        let mut marked = 0usize;
        while let Some(addr) = stack.pop() {
            let Some(node) = mirror.nodes.get_mut(&addr) else {
                continue;
            };
            if node.stamp == sequence {
                continue;
            }
            node.stamp = sequence;
            marked += 1;
            stack.extend_from_slice(&node.edges);
        }
        log_gc_mark(marked);

        // Sweep: registered nodes not stamped this round leave the table
        // and die. Taking the identity out of the table before dropping is
        // the single point of reclamation - nothing can reach the node
        // again, so no double free.
        let mut doomed: Vec<ObjRef> = Vec::new();
        mirror.nodes.retain(|_, node| {
            if node.stamp == sequence {
                return true;
            }
            match node.obj.take() {
                Some(obj) => {
                    doomed.push(obj);
                    false
                }
                // Edge-only entry: not registry-owned, never destroyed.
                None => true,
            }
        });

        let swept = doomed.len();
        for obj in doomed {
            // SAFETY: removed from the registry above; this is the only
            // reclamation site and each identity reaches it once. Edge
            // destructors running inside see the in-collector flag and
            // stay silent.
            unsafe { obj.reclaim() };
        }
        log_gc_sweep(swept);

        mirror.dirty = false;

        self.registered_objects.fetch_sub(swept, Ordering::Relaxed);
        self.reachable_objects.store(marked, Ordering::Relaxed);
        self.objects_swept.fetch_add(swept, Ordering::Relaxed);
        self.collections_run.fetch_add(1, Ordering::Relaxed);

        log_gc_complete(
            started.elapsed().as_micros() as u64,
            swept,
            self.registered_objects.load(Ordering::Relaxed),
        );
    }
}

/// Clears the thread's in-collector flag even when a destructor panics out
/// of the sweep.
struct InCollectorGuard;

impl InCollectorGuard {
    fn enter() -> Self {
        IN_COLLECTOR.with(|flag| flag.set(true));
        InCollectorGuard
    }
}

impl Drop for InCollectorGuard {
    fn drop(&mut self) {
        IN_COLLECTOR.with(|flag| flag.set(false));
    }
}

// ============================================================================
// Event intake (handle layer)
// ============================================================================

#[inline]
pub(crate) fn add_root(obj: ObjRef) {
    COLLECTOR.events.push(Event::AddRoot(obj));
}

#[inline]
pub(crate) fn remove_root(obj: ObjRef) {
    COLLECTOR.events.push(Event::RemoveRoot(obj));
}

#[inline]
pub(crate) fn connect(owner: ObjRef, target: ObjRef) {
    COLLECTOR.events.push(Event::Connect { owner, target });
}

#[inline]
pub(crate) fn disconnect(owner: ObjRef, target: ObjRef) {
    COLLECTOR.events.push(Event::Disconnect { owner, target });
}

// ============================================================================
// Public surface
// ============================================================================

/// Initialize the collector (idempotent). First handle use does this
/// implicitly; calling it up front keeps allocation out of the first
/// mutator operation.
pub fn init() {
    Lazy::force(&COLLECTOR);
}

/// Drain pending events into the mirror without tracing.
///
/// Safe from any thread; serialized against other engine operations by the
/// mirror lock. Useful when mutators generate many changes between
/// collections.
pub fn process_events() {
    assert!(
        !in_collector(),
        "contract violation: engine re-entered from a collector-invoked destructor"
    );
    let collector = &*COLLECTOR;
    let mut mirror = collector.mirror.lock();
    collector.drain(&mut mirror);
}

/// Drain pending events, then trace from roots and sweep unreachable
/// objects. Only one thread (the designated collector worker) may call this
/// at a time.
///
/// Swept objects are destroyed here, on the calling thread, through their
/// most-derived type. Their destructors must not call back into
/// [`collect`] or [`process_events`].
pub fn collect() {
    assert!(
        !in_collector(),
        "contract violation: engine re-entered from a collector-invoked destructor"
    );
    let collector = &*COLLECTOR;
    let mut mirror = collector.mirror.lock();
    let _guard = InCollectorGuard::enter();

    collector.drain(&mut mirror);
    if mirror.dirty {
        collector.trace_and_sweep(&mut mirror);
    }
}

/// True only on the thread currently inside [`collect`]. Edge destructors
/// use this to tell sweep-driven teardown from mutator teardown.
#[inline]
pub fn in_collector() -> bool {
    IN_COLLECTOR.with(|flag| flag.get())
}

/// Collector statistics for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct GcStats {
    /// Objects currently in the registry.
    pub registered_objects: usize,
    /// Objects reached by the most recent trace.
    pub reachable_objects: usize,
    /// Objects reclaimed since process start.
    pub objects_swept: usize,
    /// Traces performed since process start.
    pub collections_run: usize,
}

/// Snapshot the statistics counters (lock-free).
pub fn stats() -> GcStats {
    let collector = &*COLLECTOR;
    GcStats {
        registered_objects: collector.registered_objects.load(Ordering::Relaxed),
        reachable_objects: collector.reachable_objects.load(Ordering::Relaxed),
        objects_swept: collector.objects_swept.load(Ordering::Relaxed),
        collections_run: collector.collections_run.load(Ordering::Relaxed),
    }
}
