//! Fixed-capacity single-producer/single-consumer FIFO (§4.3).
//!
//! The source models this with a pair of counting semaphores (free slots /
//! used slots) plus a queue mutex, and a second pair of one-count gating
//! semaphores so `clear()` can serialize against `push`/`pop`. Idiomatic
//! Rust doesn't reach for raw semaphores here: a `Mutex`-guarded `VecDeque`
//! with two condition variables (`not_empty`, `not_full`) gives the exact
//! same externally observable contract — bounded capacity, FIFO order,
//! blocking `push`/`pop`, an atomic `clear` — for free, since `clear` takes
//! the same mutex `push`/`pop` already hold.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

struct State<T> {
    queue: VecDeque<T>,
    shutdown: bool,
}

pub struct BoundedBuffer<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded buffer capacity must be positive");
        Self {
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `item`. When `drop_if_full` is true and the buffer is at
    /// capacity, the item is silently discarded and this returns
    /// immediately; otherwise it blocks until a slot frees up.
    pub fn push(&self, item: T, drop_if_full: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(Error::BufferShutdown);
        }
        if state.queue.len() >= self.capacity {
            if drop_if_full {
                return Ok(());
            }
            while state.queue.len() >= self.capacity && !state.shutdown {
                self.not_full.wait(&mut state);
            }
            if state.shutdown {
                return Err(Error::BufferShutdown);
            }
        }
        state.queue.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available (FIFO) or the buffer shuts down.
    pub fn pop(&self) -> Result<T> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.shutdown {
            self.not_empty.wait(&mut state);
        }
        match state.queue.pop_front() {
            Some(item) => {
                self.not_full.notify_one();
                Ok(item)
            }
            None => Err(Error::BufferShutdown),
        }
    }

    /// Like `pop`, but gives up after `timeout` and returns `Ok(None)`
    /// instead of blocking forever. Used by workers that must still observe
    /// a stop flag while waiting.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let mut state = self.state.lock();
        if state.queue.is_empty() && !state.shutdown {
            let result = self.not_empty.wait_for(&mut state, timeout);
            if result.timed_out() && state.queue.is_empty() {
                return Ok(None);
            }
        }
        if state.shutdown && state.queue.is_empty() {
            return Err(Error::BufferShutdown);
        }
        Ok(state.queue.pop_front().inspect(|_| {
            self.not_full.notify_one();
        }))
    }

    /// Atomically empties the buffer. Holding the same mutex `push`/`pop`
    /// use makes this trivially serialized against both.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        self.not_full.notify_all();
    }

    /// Wakes every blocked `push`/`pop` with `Error::BufferShutdown`. Used
    /// during pipeline teardown so no worker is stranded waiting on a
    /// buffer nobody will ever write to or drain again.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_preserved_single_producer_consumer() {
        let buf: BoundedBuffer<i32> = BoundedBuffer::new(16);
        for i in 1..=10 {
            buf.push(i, false).unwrap();
        }
        let popped: Vec<i32> = (0..10).map(|_| buf.pop().unwrap()).collect();
        assert_eq!(popped, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn drop_if_full_discards_without_blocking() {
        let buf: BoundedBuffer<i32> = BoundedBuffer::new(2);
        buf.push(1, true).unwrap();
        buf.push(2, true).unwrap();
        buf.push(3, true).unwrap(); // dropped, buffer stays at capacity 2
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.pop().unwrap(), 1);
        assert_eq!(buf.pop().unwrap(), 2);
    }

    #[test]
    fn never_exceeds_capacity_under_fast_producer_slow_consumer() {
        let buf = Arc::new(BoundedBuffer::<i32>::new(8));
        let producer_buf = buf.clone();
        let producer = thread::spawn(move || {
            for i in 0..1000 {
                producer_buf.push(i, true).unwrap();
            }
        });
        for _ in 0..50 {
            assert!(buf.len() <= buf.capacity());
            thread::sleep(Duration::from_micros(200));
        }
        producer.join().unwrap();
    }

    #[test]
    fn clear_is_observed_atomically_by_concurrent_pop() {
        let buf = Arc::new(BoundedBuffer::<i32>::new(4));
        buf.push(1, false).unwrap();
        buf.push(2, false).unwrap();
        buf.clear();
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn shutdown_wakes_blocked_pop() {
        let buf = Arc::new(BoundedBuffer::<i32>::new(1));
        let popper_buf = buf.clone();
        let popper = thread::spawn(move || popper_buf.pop());
        thread::sleep(Duration::from_millis(20));
        buf.shutdown();
        let result = popper.join().unwrap();
        assert!(matches!(result, Err(Error::BufferShutdown)));
    }
}
