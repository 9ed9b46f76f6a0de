use crate::error::{BuildError, Interrupted};
use crate::policy::{DiscardOldest, OverloadPolicy};
use crate::queue::BacklogQueue;
use crate::roster::{Roster, WorkerId, WorkerKind};
use crate::task::{Task, TaskBox};

use parking_lot::Mutex;
use tracing::{debug, debug_span, error, trace, warn};

use std::{fmt, io, thread};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::thread::JoinHandle;
use std::time::Duration;

/// Execute tasks on a two-tier set of pooled threads.
///
/// For more details, see the [library level documentation](./index.html).
pub struct ThreadPool<T> {
    inner: Arc<Inner<T>>,
}

/// Thread pool configuration.
///
/// Provide detailed control over the properties and behavior of the thread
/// pool.
pub struct Builder<T> {
    // Thread pool specific configuration values
    thread_pool: Config,

    // Max number of tasks that can be pending in the backlog
    queue_capacity: usize,

    // Falls back to `DiscardOldest`
    overload_policy: Option<Box<dyn OverloadPolicy<T>>>,
}

/// Thread pool specific configuration values
struct Config {
    persistent_workers: usize,
    max_workers: usize,
    idle_timeout: Duration,
    // Used to configure a worker thread
    name_prefix: Option<String>,
    stack_size: Option<usize>,
    after_start: Option<Arc<dyn Fn() + Send + Sync>>,
    before_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

struct Inner<T> {
    // Tasks waiting for a worker. Shared by every worker of both tiers.
    queue: BacklogQueue<T>,

    // Live worker handles. Every admission decision that depends on the worker
    // counts is taken while holding this lock, and the worker is spawned and
    // inserted before it is released. Retiring transient workers remove
    // themselves under the same lock, so `max_workers` can never be exceeded.
    roster: Mutex<Roster>,

    // Owns tasks that could be neither started nor queued
    overload_policy: Box<dyn OverloadPolicy<T>>,

    // Used to name threads
    next_worker_id: AtomicUsize,

    // Configuration
    config: Config,
}

/// Tracks state associated with a worker thread
struct Worker<T> {
    id: WorkerId,
    kind: WorkerKind,
    // Shared thread pool state
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ThreadPool<T> {
    fn clone(&self) -> Self {
        ThreadPool { inner: self.inner.clone() }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        const SOME: &&str = &"Some(_)";
        const NONE: &&str = &"None";

        fmt.debug_struct("Config")
           .field("persistent_workers", &self.persistent_workers)
           .field("max_workers", &self.max_workers)
           .field("idle_timeout", &self.idle_timeout)
           .field("name_prefix", &self.name_prefix)
           .field("stack_size", &self.stack_size)
           .field("after_start", if self.after_start.is_some() { SOME } else { NONE })
           .field("before_stop", if self.before_stop.is_some() { SOME } else { NONE })
           .finish()
    }
}

impl<T> fmt::Debug for Builder<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Builder")
           .field("thread_pool", &self.thread_pool)
           .field("queue_capacity", &self.queue_capacity)
           .field("overload_policy", &self.overload_policy.as_ref().map(|_| "_"))
           .finish()
    }
}

impl<T> fmt::Debug for ThreadPool<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let roster = self.inner.roster.lock();

        fmt.debug_struct("ThreadPool")
           .field("persistent", &roster.persistent_len())
           .field("transient", &roster.transient_len())
           .field("queue", &self.inner.queue)
           .field("config", &self.inner.config)
           .finish()
    }
}

// ===== impl Builder =====

impl<T: Task> Builder<T> {
    /// Returns a builder with default values
    ///
    /// One persistent worker per CPU, no transient tier, a one minute idle
    /// timeout, room for 64Ki queued tasks and the `DiscardOldest` policy.
    pub fn new() -> Builder<T> {
        let num_cpus = num_cpus::get();

        Builder {
            thread_pool: Config {
                persistent_workers: num_cpus,
                max_workers: num_cpus,
                idle_timeout: Duration::from_secs(60),
                name_prefix: None,
                stack_size: None,
                after_start: None,
                before_stop: None,
            },
            queue_capacity: 64 * 1_024,
            overload_policy: None,
        }
    }

    /// Set the number of persistent workers.
    ///
    /// Persistent workers are started lazily, one per submission, until this
    /// many exist. They never exit once started.
    pub fn persistent_workers(mut self, val: usize) -> Self {
        self.thread_pool.persistent_workers = val;
        self
    }

    /// Set the maximum number of workers, persistent and transient combined.
    pub fn max_workers(mut self, val: usize) -> Self {
        self.thread_pool.max_workers = val;
        self
    }

    /// Set how long a transient worker waits for a queued task before it
    /// retires.
    pub fn idle_timeout(mut self, val: Duration) -> Self {
        self.thread_pool.idle_timeout = val;
        self
    }

    /// Maximum number of tasks that can be pending in the backlog
    pub fn queue_capacity(mut self, val: usize) -> Self {
        self.queue_capacity = val;
        self
    }

    /// Set the policy invoked when the pool is saturated
    pub fn overload_policy<P>(mut self, val: P) -> Self
        where P: OverloadPolicy<T>
    {
        self.overload_policy = Some(Box::new(val));
        self
    }

    /// Set name prefix of threads spawned by the pool
    ///
    /// Thread name prefix is used for generating thread names. For example, if
    /// prefix is `my-pool-`, then threads in the pool will get names like
    /// `my-pool-1` etc.
    pub fn name_prefix<S: Into<String>>(mut self, val: S) -> Self {
        self.thread_pool.name_prefix = Some(val.into());
        self
    }

    /// Set the stack size of threads spawned by the pool
    pub fn stack_size(mut self, val: usize) -> Self {
        self.thread_pool.stack_size = Some(val);
        self
    }

    /// Execute function `f` right after each thread is started but before
    /// running any tasks on it
    ///
    /// This is initially intended for bookkeeping and monitoring uses
    pub fn after_start<F>(mut self, f: F) -> Self
        where F: Fn() + Send + Sync + 'static
    {
        self.thread_pool.after_start = Some(Arc::new(f));
        self
    }

    /// Execute function `f` before each worker thread stops
    ///
    /// Persistent workers only stop when their wait on the backlog is
    /// interrupted. Transient workers also stop when they retire.
    pub fn before_stop<F>(mut self, f: F) -> Self
        where F: Fn() + Send + Sync + 'static
    {
        self.thread_pool.before_stop = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and return the thread pool
    ///
    /// No threads are started until tasks are submitted.
    pub fn build(self) -> Result<ThreadPool<T>, BuildError> {
        let c = &self.thread_pool;

        if c.max_workers < c.persistent_workers {
            return Err(BuildError::MaxBelowPersistent {
                persistent: c.persistent_workers,
                max: c.max_workers,
            });
        }

        if c.idle_timeout.is_zero() {
            return Err(BuildError::ZeroIdleTimeout(c.idle_timeout));
        }

        Ok(self.finish())
    }

    fn finish(self) -> ThreadPool<T> {
        let overload_policy = self.overload_policy
            .unwrap_or_else(|| Box::new(DiscardOldest));

        let inner = Arc::new(Inner {
            queue: BacklogQueue::new(self.queue_capacity),
            roster: Mutex::new(Roster::new()),
            overload_policy,
            next_worker_id: AtomicUsize::new(1),
            config: self.thread_pool,
        });

        ThreadPool { inner }
    }
}

impl<T: Task> Default for Builder<T> {
    fn default() -> Builder<T> {
        Builder::new()
    }
}

// ===== impl ThreadPool =====

impl<T: Task> ThreadPool<T> {
    /// Create a thread pool from its core parameters.
    ///
    /// Equivalent to configuring a `Builder` with the same values.
    pub fn new<P>(persistent_workers: usize,
                  max_workers: usize,
                  idle_timeout: Duration,
                  queue_capacity: usize,
                  overload_policy: P) -> Result<ThreadPool<T>, BuildError>
        where P: OverloadPolicy<T>
    {
        Builder::new()
            .persistent_workers(persistent_workers)
            .max_workers(max_workers)
            .idle_timeout(idle_timeout)
            .queue_capacity(queue_capacity)
            .overload_policy(overload_policy)
            .build()
    }

    /// Create a thread pool that reuses a fixed number of threads operating off
    /// a shared, effectively unbounded, backlog.
    ///
    /// At any point, at most `size` threads will be active processing tasks. If
    /// additional tasks are submitted when all threads are active, they will
    /// wait in the backlog until a thread is available.
    pub fn fixed_size(size: usize) -> ThreadPool<T> {
        Builder::new()
            .persistent_workers(size)
            .max_workers(size)
            .queue_capacity(usize::MAX)
            .finish()
    }

    /// Create a thread pool with a single worker thread operating off an
    /// effectively unbounded backlog.
    ///
    /// Tasks are guaranteed to execute sequentially, and no more than one task
    /// will be active at any given time.
    pub fn single_thread() -> ThreadPool<T> {
        ThreadPool::fixed_size(1)
    }

    /// Submit a task for execution.
    ///
    /// Never blocks on the backlog. The task is routed, in order of
    /// preference, to:
    ///
    /// 1. a new persistent worker, while fewer than `persistent_workers` exist,
    /// 2. the backlog, if it has a free slot,
    /// 3. a new transient worker, while fewer than `max_workers` exist,
    /// 4. the backlog again, in case a slot was freed in the meantime,
    /// 5. the overload policy.
    ///
    /// Each step is decided on the state visible when it runs, so concurrent
    /// submissions and retiring workers may make a later step succeed where an
    /// earlier snapshot said otherwise.
    pub fn submit(&self, task: T) {
        let task = match self.add_worker(WorkerKind::Persistent, task) {
            Ok(()) => return,
            Err(task) => task,
        };

        let task = match self.inner.queue.offer(task) {
            Ok(()) => {
                trace!("task queued");
                return;
            }
            Err(task) => task,
        };

        let task = match self.add_worker(WorkerKind::Transient, task) {
            Ok(()) => return,
            Err(task) => task,
        };

        if let Err(task) = self.inner.queue.offer(task) {
            debug!(queued = self.inner.queue.len(), "pool saturated; invoking overload policy");
            self.inner.overload_policy.on_overload(task, self);
        } else {
            trace!("task queued on retry");
        }
    }

    /// The backlog shared by all workers.
    ///
    /// Overload policies use this to drop or wait for queued tasks.
    pub fn backlog(&self) -> &BacklogQueue<T> {
        &self.inner.queue
    }

    /// Interrupt every worker currently waiting on the backlog.
    ///
    /// An interrupted worker exits. It stays accounted for in the pool and is
    /// not replaced, so each interrupted worker permanently reduces the pool's
    /// capacity by one. Returns the number of interrupted workers.
    pub fn interrupt_waiting(&self) -> usize {
        let n = self.inner.queue.interrupt_waiters();
        debug!(workers = n, "interrupted waiting workers");
        n
    }

    /// Returns the current number of workers, both tiers combined
    pub fn size(&self) -> usize {
        self.inner.roster.lock().len()
    }

    /// Returns the current number of persistent workers
    pub fn persistent_count(&self) -> usize {
        self.inner.roster.lock().persistent_len()
    }

    /// Returns the current number of transient workers
    pub fn transient_count(&self) -> usize {
        self.inner.roster.lock().transient_len()
    }

    /// Returns the current number of pending tasks
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns the configured persistent worker target
    pub fn persistent_workers(&self) -> usize {
        self.inner.config.persistent_workers
    }

    /// Returns the configured maximum number of workers
    pub fn max_workers(&self) -> usize {
        self.inner.config.max_workers
    }

    /// Returns the idle timeout of transient workers
    pub fn idle_timeout(&self) -> Duration {
        self.inner.config.idle_timeout
    }

    // Start a worker of `kind` with `task` as its first task, if the roster
    // has room for it. The task is handed back otherwise.
    fn add_worker(&self, kind: WorkerKind, task: T) -> Result<(), T> {
        let config = &self.inner.config;
        let mut roster = self.inner.roster.lock();

        if !roster.has_room(kind, config.persistent_workers, config.max_workers) {
            return Err(task);
        }

        let id = self.inner.next_worker_id.fetch_add(1, Relaxed);

        let worker = Worker {
            id,
            kind,
            inner: self.inner.clone(),
        };

        // The first task is sent once the thread exists. If spawning fails the
        // receiver is dropped with the closure and the send hands the task
        // back.
        let (tx, rx) = mpsc::sync_channel(1);

        match worker.spawn(rx) {
            Ok(handle) => {
                roster.insert(kind, id, handle);
                drop(roster);

                debug!(worker = id, ?kind, "started worker");
            }
            Err(err) => {
                drop(roster);

                error!(worker = id, ?kind, error = %err, "failed to spawn worker thread");
            }
        }

        tx.send(task).map_err(|mpsc::SendError(task)| task)
    }
}

impl ThreadPool<Box<dyn TaskBox>> {
    /// Submit a fn to run on the thread pool
    pub fn submit_fn<F>(&self, task: F)
        where F: FnOnce() + Send + 'static
    {
        let task: Box<dyn TaskBox> = Box::new(task);
        self.submit(task)
    }
}

// ===== impl Worker ====

impl<T: Task> Worker<T> {
    fn spawn(self, first_task: mpsc::Receiver<T>) -> io::Result<JoinHandle<()>> {
        let mut b = thread::Builder::new();

        {
            let c = &self.inner.config;

            if let Some(stack_size) = c.stack_size {
                b = b.stack_size(stack_size);
            }

            if let Some(ref name_prefix) = c.name_prefix {
                b = b.name(format!("{}{}", name_prefix, self.id));
            }
        }

        b.spawn(move || {
            if let Ok(task) = first_task.recv() {
                self.run(task);
            }
        })
    }

    fn run(self, first_task: T) {
        let _span = debug_span!("worker", id = self.id, kind = ?self.kind).entered();

        // Run the before hook
        if let Some(f) = self.inner.config.after_start.as_ref() {
            f();
        }

        self.run_task(first_task);

        loop {
            match self.next_task() {
                Ok(Some(task)) => self.run_task(task),
                Ok(None) => {
                    self.run_before_stop();
                    self.retire();
                    return;
                }
                Err(Interrupted) => {
                    // Not removed from the roster and not replaced
                    warn!("wait on backlog interrupted; worker exiting");
                    self.run_before_stop();
                    return;
                }
            }
        }
    }

    // Gets the next task, blocking if necessary. Returns `Ok(None)` if a
    // transient worker stayed idle for the whole timeout.
    fn next_task(&self) -> Result<Option<T>, Interrupted> {
        match self.kind {
            WorkerKind::Persistent => self.inner.queue.take().map(Some),
            WorkerKind::Transient => {
                self.inner.queue.poll_timeout(self.inner.config.idle_timeout)
            }
        }
    }

    fn run_task(&self, task: T) {
        // AssertUnwindSafe is used because `Task` is `Send + 'static`, which
        // is essentially unwind safe
        if panic::catch_unwind(AssertUnwindSafe(move || task.run())).is_err() {
            warn!("task panicked");
        }
    }

    fn run_before_stop(&self) {
        if let Some(f) = self.inner.config.before_stop.as_ref() {
            f();
        }
    }

    fn retire(&self) {
        debug_assert_eq!(WorkerKind::Transient, self.kind);

        // Dropping our own handle detaches the thread, which is about to exit
        let handle = self.inner.roster.lock().remove_transient(self.id);
        drop(handle);

        debug!("idle timeout elapsed; worker retired");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_rejects_max_below_persistent() {
        let res = Builder::<Box<dyn TaskBox>>::new()
            .persistent_workers(3)
            .max_workers(2)
            .build();

        assert_eq!(
            BuildError::MaxBelowPersistent { persistent: 3, max: 2 },
            res.unwrap_err()
        );
    }

    #[test]
    fn build_rejects_zero_idle_timeout() {
        let res = Builder::<Box<dyn TaskBox>>::new()
            .idle_timeout(Duration::from_secs(0))
            .build();

        assert_eq!(BuildError::ZeroIdleTimeout(Duration::ZERO), res.unwrap_err());
    }

    #[test]
    fn build_accepts_empty_pool() {
        let pool = Builder::<Box<dyn TaskBox>>::new()
            .persistent_workers(0)
            .max_workers(0)
            .queue_capacity(0)
            .build()
            .unwrap();

        assert_eq!(0, pool.size());
        assert_eq!(0, pool.backlog().capacity());
    }

    #[test]
    fn defaults() {
        let pool = Builder::<Box<dyn TaskBox>>::new().build().unwrap();

        assert_eq!(num_cpus::get(), pool.persistent_workers());
        assert_eq!(num_cpus::get(), pool.max_workers());
        assert_eq!(Duration::from_secs(60), pool.idle_timeout());
        assert_eq!(64 * 1_024, pool.backlog().capacity());
    }

    #[test]
    fn spawned_threads_are_named() {
        let pool = Builder::new()
            .persistent_workers(1)
            .max_workers(1)
            .name_prefix("tiered-")
            .build()
            .unwrap();

        let (tx, rx) = mpsc::channel();

        pool.submit_fn(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });

        assert_eq!(Some("tiered-1".to_string()), rx.recv().unwrap());
    }
}
