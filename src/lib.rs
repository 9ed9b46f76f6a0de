//! Execute tasks on a bounded, two-tier pool of threads.
//!
//! A thread pool contains a set of previously spawned threads enabling running
//! tasks in parallel without having to spawn up a new thread for each task.
//! This pool splits its threads in two tiers:
//!
//! * **Persistent workers** are started lazily, one per submitted task, until
//!   the configured target is reached. Once started they serve the backlog
//!   forever.
//! * **Transient workers** are only started once the backlog is full. They
//!   serve the backlog like persistent workers, but retire after staying idle
//!   for the configured timeout.
//!
//! Tasks that find no free worker slot wait in a bounded FIFO backlog. When
//! the backlog is full and the pool is at its maximum size, the task is handed
//! to an [`OverloadPolicy`](policy/trait.OverloadPolicy.html). The default,
//! [`DiscardOldest`](policy/struct.DiscardOldest.html), drops the oldest queued
//! task and submits the new one again.
//!
//! Submitting never blocks the caller (unless the overload policy chooses to)
//! and never returns an error. Use [`Builder`](struct.Builder.html) to
//! configure a pool, or the [`fixed_size`](struct.ThreadPool.html#method.fixed_size)
//! and [`single_thread`](struct.ThreadPool.html#method.single_thread) shortcuts.
//!
//! The pool has no shutdown protocol: workers live as long as the process.

#![deny(warnings, missing_docs, missing_debug_implementations)]

mod error;
mod queue;
mod roster;
mod task;
mod thread_pool;

pub mod policy;

pub use error::{BuildError, Interrupted};
pub use policy::{Block, CallerRuns, DiscardNewest, DiscardOldest, OverloadPolicy};
pub use queue::BacklogQueue;
pub use task::{Task, TaskBox};
pub use thread_pool::{Builder, ThreadPool};
