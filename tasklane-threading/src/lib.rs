//! # Tasklane Threading
//!
//! Offloads work from a single-threaded, cooperative host onto detached threads and schedules
//! follow-up work back onto the host once it completes.
//!
//! The host owns an embedded scripting engine and a loop that it drives itself. It can never be
//! called into concurrently. This crate provides three pieces to work around that:
//!
//! - **[`TransportBuffer`]**: a growable, locked byte accumulator. It carries the serialized form
//!   of a callable from the host context into an isolated one.
//! - **[`TaskQueue`]**: a bounded FIFO of [`TaskHandle`]s with per-push [`DedupMode`]s. Any thread
//!   may push, the host drains. Every push ticks a [`Wake`] sink so an event-driven host loop knows
//!   when to drain.
//! - **[`Detacher`]**: serializes a callable, loads it into a fresh isolated context prepared by
//!   the registered [`StartupHooks`], and runs it on its own detached thread. If the callable
//!   succeeds with a truthy first result, its [`Trigger`] is pushed onto the task queue.
//!
//! The scripting engine itself is abstracted by the [`ScriptEngine`] trait.
//!
//! ## Concurrency Model
//!
//! One host thread alternates between its own work and draining the queue. Each call to
//! [`Detacher::detach`] creates one additional thread that is never joined and exits after its
//! job. There is no pool, no admission control and no cancellation.
//!
//! The queue's slots and cursors are the only state shared between threads and are guarded by a
//! single lock. Locks are never held while running user code. Transport buffers and isolated
//! contexts are owned by exactly one thread at a time: the host while preparing a job, the worker
//! afterwards.
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tasklane_threading::{DedupMode, Detacher, TaskHandle, TaskQueue, Trigger, WakeSignal};
//!
//! let signal = Arc::new(WakeSignal::new());
//! let queue = Arc::new(TaskQueue::new(256, signal.clone()));
//! let detacher = Detacher::builder(Arc::new(engine), queue.clone())
//!     .startup_hook(|context| install_bindings(context))
//!     .build();
//!
//! let trigger = Trigger::new(TaskHandle::new(on_done_ref), DedupMode::Once);
//! detacher.detach_with_trigger(&callable, args, trigger)?;
//!
//! loop {
//!     queue.poll(&signal, Duration::from_millis(100), |handle| host.call_registered(handle));
//! }
//! ```
//!
//! ## Error Handling
//!
//! Failures before the worker thread starts are returned as [`DetachError`]. Failures inside the
//! worker, including panics, are logged at error level with the `detached` field set. Rejected
//! pushes return [`QueueError::Full`] and still wake the host.

#![warn(missing_docs)]

mod buffer;
mod builder;
mod detach;
mod engine;
mod queue;
mod wake;

pub use self::buffer::*;
pub use self::builder::DetachBuilder;
pub use self::detach::*;
pub use self::engine::{ScriptEngine, StartupHooks};
pub use self::queue::*;
pub use self::wake::*;
