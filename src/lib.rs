//! tracegc - a concurrent mark-sweep cycle collector
//!
//! Mutator threads manipulate [`Root`] and [`Edge`] handles; every handle
//! operation enqueues a graph-change event on a bounded lock-free queue. A
//! collector worker replays those events into a private mirror of the
//! reference graph and periodically traces from roots, sweeping whatever it
//! cannot reach - including reference cycles that no reference count could
//! ever reclaim. Mutators pay only the enqueue; the tracing cost lives
//! entirely on the worker.
//!
//! ```
//! use parking_lot::Mutex;
//! use tracegc::{collect, Collectable, Edge, Root};
//!
//! struct Node {
//!     next: Mutex<Edge<Node>>,
//! }
//! impl Collectable for Node {}
//!
//! tracegc::init();
//!
//! // Two nodes referencing each other: a cycle.
//! let a = Root::new_with(|owner| Node { next: Mutex::new(Edge::new(owner)) });
//! let b = Root::new_with(|owner| Node { next: Mutex::new(Edge::new(owner)) });
//! a.next.lock().set(&b);
//! b.next.lock().set(&a);
//!
//! drop(a);
//! drop(b);
//! collect(); // both nodes reclaimed
//! ```
//!
//! The usual driver shape is a dedicated worker thread that calls
//! [`process_events`] frequently and [`collect`] occasionally; only one
//! thread may call [`collect`] at a time.

pub mod logging;

mod collector;
mod event;
mod handle;


pub use collector::{collect, in_collector, init, process_events, stats, GcStats};
pub use handle::{Collectable, Edge, Owner, Root};
