use crate::error::Interrupted;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use std::fmt;
use std::time::{Duration, Instant};

/// Bounded FIFO shared by the pool controller and its workers.
///
/// Submitting threads only ever use the non-blocking `offer`. Persistent
/// workers park in `take`, transient workers park in `poll_timeout` for at most
/// their idle timeout.
///
/// A capacity of `usize::MAX` is treated as unbounded. Any other capacity is
/// allocated up front. A zero capacity queue never holds an item; `offer` only
/// succeeds by handing the item straight to a thread blocked in `take` or
/// `poll_timeout`.
pub struct BacklogQueue<T> {
    tx: Sender<T>,
    // Kept by the queue so that `poll` can drop the head from the producer side
    rx: Receiver<T>,
    capacity: usize,
    interrupt: Mutex<Interrupt>,
}

// Waiters select on `signal` next to the task receiver. Nothing is ever sent
// on it; interrupting swaps in a fresh pair and drops the old `trigger`, which
// disconnects every receiver handed out for the previous generation.
struct Interrupt {
    trigger: Sender<()>,
    signal: Receiver<()>,
    generation: u64,
    // Threads blocked on the current generation
    waiters: usize,
}

// Registered for the duration of a blocking wait
struct Waiter<'a, T> {
    queue: &'a BacklogQueue<T>,
    generation: u64,
    signal: Receiver<()>,
}

impl<T> BacklogQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> BacklogQueue<T> {
        let (tx, rx) = if capacity == usize::MAX {
            unbounded()
        } else {
            bounded(capacity)
        };

        let (trigger, signal) = unbounded();

        BacklogQueue {
            tx,
            rx,
            capacity,
            interrupt: Mutex::new(Interrupt {
                trigger,
                signal,
                generation: 0,
                waiters: 0,
            }),
        }
    }

    /// Enqueue `item` if there is a free slot, handing it back otherwise.
    pub fn offer(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Enqueue `item`, blocking until a slot frees up.
    ///
    /// A zero capacity queue never has a slot, so the item is returned
    /// immediately instead.
    pub fn put(&self, item: T) -> Result<(), T> {
        if self.capacity == 0 {
            return Err(item);
        }

        // The queue holds a receiver, the channel cannot be disconnected
        self.tx.send(item).map_err(|e| e.into_inner())
    }

    /// Remove the head of the queue, blocking until one is available.
    pub fn take(&self) -> Result<T, Interrupted> {
        let waiter = self.wait();

        let res = select! {
            recv(self.rx) -> item => item.map_err(|_| Interrupted),
            recv(waiter.signal) -> _ => Err(Interrupted),
        };

        res
    }

    /// Remove the head of the queue, waiting up to `timeout` for one to
    /// arrive. Returns `Ok(None)` if the timeout elapsed first.
    ///
    /// A timeout too large to be represented as a deadline waits forever.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>, Interrupted> {
        if Instant::now().checked_add(timeout).is_none() {
            return self.take().map(Some);
        }

        let waiter = self.wait();

        let res = select! {
            recv(self.rx) -> item => item.map(Some).map_err(|_| Interrupted),
            recv(waiter.signal) -> _ => Err(Interrupted),
            default(timeout) => Ok(None),
        };

        res
    }

    /// Remove the head of the queue without waiting.
    pub fn poll(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wake every thread currently blocked in `take` or `poll_timeout` with
    /// `Err(Interrupted)`. Threads that start waiting afterwards are not
    /// affected. Returns the number of interrupted waiters.
    pub fn interrupt_waiters(&self) -> usize {
        let mut interrupt = self.interrupt.lock();
        let waiters = interrupt.waiters;

        if waiters > 0 {
            let (trigger, signal) = unbounded();

            interrupt.signal = signal;
            interrupt.generation = interrupt.generation.wrapping_add(1);
            interrupt.waiters = 0;

            // Disconnects the previous generation
            drop(std::mem::replace(&mut interrupt.trigger, trigger));
        }

        waiters
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if no items are queued
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Number of threads currently blocked waiting for an item
    pub fn waiters(&self) -> usize {
        self.interrupt.lock().waiters
    }

    fn wait(&self) -> Waiter<'_, T> {
        let mut interrupt = self.interrupt.lock();
        interrupt.waiters += 1;

        Waiter {
            queue: self,
            generation: interrupt.generation,
            signal: interrupt.signal.clone(),
        }
    }
}

impl<'a, T> Drop for Waiter<'a, T> {
    fn drop(&mut self) {
        let mut interrupt = self.queue.interrupt.lock();

        // An interrupt already reset the count
        if interrupt.generation == self.generation {
            interrupt.waiters -= 1;
        }
    }
}

impl<T> fmt::Debug for BacklogQueue<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("BacklogQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("waiters", &self.waiters())
            .finish()
    }
}
