//! Strategies for tasks submitted to a saturated pool.
//!
//! A pool is saturated when the backlog queue is full and the number of
//! workers has reached `max_workers`. The configured `OverloadPolicy` then
//! takes ownership of the task.

use crate::task::Task;
use crate::thread_pool::ThreadPool;

use tracing::{debug, warn};

/// Handles a task that could be neither started nor queued
///
/// Implementations receive the pool so they can inspect or drain its backlog
/// through `ThreadPool::backlog` and resubmit through `ThreadPool::submit`.
/// Any `Fn(T, &ThreadPool<T>)` closure is a policy.
pub trait OverloadPolicy<T>: Send + Sync + 'static {
    /// Take responsibility for `task`
    fn on_overload(&self, task: T, pool: &ThreadPool<T>);
}

impl<T, F> OverloadPolicy<T> for F
where
    F: Fn(T, &ThreadPool<T>) + Send + Sync + 'static,
{
    fn on_overload(&self, task: T, pool: &ThreadPool<T>) {
        (self)(task, pool)
    }
}

/// Drop the oldest queued task, then resubmit the new one.
///
/// The head of the backlog is removed unconditionally and the new task goes
/// through the full admission sequence again. If there was nothing to remove,
/// because the queue drained in the meantime or has zero capacity, the task is
/// queued if a slot is free and dropped otherwise. This is the default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardOldest;

/// Drop the task that triggered the overload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardNewest;

/// Run the task on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerRuns;

/// Block the submitting thread until the backlog has room for the task.
///
/// A zero capacity backlog never has room, so the task runs on the submitting
/// thread instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Block;

impl<T: Task> OverloadPolicy<T> for DiscardOldest {
    fn on_overload(&self, task: T, pool: &ThreadPool<T>) {
        if pool.backlog().poll().is_some() {
            debug!("overloaded; discarded oldest queued task");
            pool.submit(task);
            return;
        }

        // Nothing was discarded. Resubmitting could come straight back here,
        // so only the slot that may have freed up is tried.
        if let Err(task) = pool.backlog().offer(task) {
            debug!("overloaded with an empty backlog; discarded submitted task");
            drop(task);
        }
    }
}

impl<T: Task> OverloadPolicy<T> for DiscardNewest {
    fn on_overload(&self, task: T, _: &ThreadPool<T>) {
        debug!("overloaded; discarded submitted task");
        drop(task);
    }
}

impl<T: Task> OverloadPolicy<T> for CallerRuns {
    fn on_overload(&self, task: T, _: &ThreadPool<T>) {
        debug!("overloaded; running task on the caller");
        task.run();
    }
}

impl<T: Task> OverloadPolicy<T> for Block {
    fn on_overload(&self, task: T, pool: &ThreadPool<T>) {
        if let Err(task) = pool.backlog().put(task) {
            warn!("overloaded with a zero capacity backlog; running task on the caller");
            task.run();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::task::TaskBox;
    use crate::thread_pool::Builder;

    use parking_lot::Mutex;

    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, name: &'static str) -> impl FnOnce() + Send + 'static {
        let log = log.clone();
        move || log.lock().push(name)
    }

    // A single worker, busy until the returned sender is dropped or signaled.
    fn saturated_pool<P>(policy: P, queue_capacity: usize) -> (ThreadPool<Box<dyn TaskBox>>, mpsc::Sender<()>)
    where
        P: OverloadPolicy<Box<dyn TaskBox>>,
    {
        let pool = Builder::new()
            .persistent_workers(1)
            .max_workers(1)
            .queue_capacity(queue_capacity)
            .overload_policy(policy)
            .build()
            .unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.submit_fn(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });

        started_rx.recv().unwrap();
        (pool, release_tx)
    }

    fn wait_until_drained(pool: &ThreadPool<Box<dyn TaskBox>>) {
        let (tx, rx) = mpsc::channel();
        pool.backlog().put(Box::new(move || tx.send(()).unwrap())).ok().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn discard_oldest_replaces_head() {
        let log = Log::default();
        let (pool, release) = saturated_pool(DiscardOldest, 2);

        pool.submit_fn(record(&log, "A"));
        pool.submit_fn(record(&log, "B"));
        assert_eq!(2, pool.queued());

        pool.submit_fn(record(&log, "C"));
        assert_eq!(2, pool.queued());

        release.send(()).unwrap();
        wait_until_drained(&pool);

        assert_eq!(vec!["B", "C"], *log.lock());
    }

    #[test]
    fn discard_oldest_with_empty_backlog() {
        let log = Log::default();
        let (pool, release) = saturated_pool(DiscardOldest, 1);

        // Nothing to discard, the task lands in the free slot
        let task: Box<dyn TaskBox> = Box::new(record(&log, "A"));
        DiscardOldest.on_overload(task, &pool);
        assert_eq!(1, pool.queued());

        release.send(()).unwrap();
        wait_until_drained(&pool);

        assert_eq!(vec!["A"], *log.lock());
    }

    #[test]
    fn discard_oldest_with_zero_capacity_drops_task() {
        let pool = ThreadPool::new(0, 0, Duration::from_millis(10), 0, DiscardOldest).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.submit_fn(move || tx.send(()).unwrap());

        // Dropped without running, and the sender went with it
        assert!(rx.recv().is_err());
        assert_eq!(0, pool.size());
    }

    #[test]
    fn discard_oldest_at_max_with_zero_capacity() {
        let log = Log::default();
        let (pool, release) = saturated_pool(DiscardOldest, 0);

        for name in ["A", "B", "C"] {
            pool.submit_fn(record(&log, name));
        }

        assert_eq!(0, pool.queued());
        drop(release);

        thread::sleep(Duration::from_millis(50));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn discard_newest_drops_task() {
        let log = Log::default();
        let (pool, release) = saturated_pool(DiscardNewest, 1);

        pool.submit_fn(record(&log, "A"));
        pool.submit_fn(record(&log, "B"));

        release.send(()).unwrap();
        wait_until_drained(&pool);

        assert_eq!(vec!["A"], *log.lock());
    }

    #[test]
    fn caller_runs_on_submitting_thread() {
        let (pool, release) = saturated_pool(CallerRuns, 1);
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();

        pool.submit_fn(|| {});

        pool.submit_fn(move || {
            tx.send(thread::current().id()).unwrap();
        });

        assert_eq!(caller, rx.try_recv().unwrap());
        drop(release);
    }

    #[test]
    fn block_waits_for_room() {
        let log = Log::default();
        let (pool, release) = saturated_pool(Block, 1);

        pool.submit_fn(record(&log, "A"));

        let th = {
            let pool = pool.clone();
            let task = record(&log, "B");
            thread::spawn(move || pool.submit_fn(task))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!th.is_finished());

        release.send(()).unwrap();
        th.join().unwrap();
        wait_until_drained(&pool);

        assert_eq!(vec!["A", "B"], *log.lock());
    }

    #[test]
    fn block_with_zero_capacity_runs_on_caller() {
        let (pool, release) = saturated_pool(Block, 0);
        let (tx, rx) = mpsc::channel();

        pool.submit_fn(move || tx.send(thread::current().id()).unwrap());

        assert_eq!(thread::current().id(), rx.try_recv().unwrap());
        drop(release);
    }

    #[test]
    fn closure_policy() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let (pool, release) = saturated_pool(
            move |_task: Box<dyn TaskBox>, pool: &ThreadPool<Box<dyn TaskBox>>| {
                tx.lock().send(pool.size()).unwrap();
            },
            0,
        );

        pool.submit_fn(|| {});
        assert_eq!(1, rx.try_recv().unwrap());
        drop(release);
    }
}
