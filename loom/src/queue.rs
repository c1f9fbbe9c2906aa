//! A small bounded MPSC queue that applies backpressure instead of dropping.
//!
//! Used by [`crate::network::Network`] for its inbound network-event mailbox:
//! per §7 of the design notes, an overrun on that queue blocks the producer
//! (an I/O worker thread) rather than discarding the event.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> BoundedQueue<T> {
        BoundedQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocks while the queue is full.
    pub fn push(&self, value: T) {
        let mut guard = self.inner.lock().unwrap();
        while guard.len() >= self.capacity {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.push_back(value);
        self.not_empty.notify_one();
    }

    /// Drains everything currently queued without blocking.
    pub fn drain(&self) -> Vec<T> {
        let mut guard = self.inner.lock().unwrap();
        let drained: Vec<T> = guard.drain(..).collect();
        if !drained.is_empty() {
            self.not_full.notify_all();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_and_drain() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.drain(), vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_backpressure_blocks_until_drained() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1);

        let producer_queue = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            producer_queue.push(2);
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(queue.len(), 1);

        let drained = queue.drain();
        handle.join().unwrap();

        assert_eq!(drained, vec![1]);
        assert_eq!(queue.drain(), vec![2]);
    }
}
