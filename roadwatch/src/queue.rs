//! Bounded single-producer/single-consumer queue with drop-oldest overflow

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded queue that never blocks the producer.
///
/// When full, `push` evicts the oldest queued item before enqueueing, so the
/// queue always holds the most recent `capacity` items.
pub struct FrameQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            evicted: self.evicted.clone(),
        }
    }
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue `item`, dropping the oldest item if the queue is full.
    /// Returns the number of items evicted to make room.
    pub fn push(&self, item: T) -> usize {
        let mut item = item;
        let mut dropped = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
                // Both ends live in `self`, so this cannot happen
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        if dropped > 0 {
            self.evicted.fetch_add(dropped as u64, Ordering::Relaxed);
            log::debug!("Frame queue full, evicted {} oldest item(s)", dropped);
        }
        dropped
    }

    /// Oldest queued item, without waiting
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for an item
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items dropped by drop-oldest eviction
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drop_oldest_keeps_latest() {
        let queue = FrameQueue::new(3);
        for i in 0..5 {
            queue.push(i);
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_count(), 2);

        let drained: Vec<i32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(drained, vec![2, 3, 4]);
    }

    #[test]
    fn test_push_into_full_queue_evicts_exactly_one() {
        let queue = FrameQueue::new(2);
        assert_eq!(queue.push('a'), 0);
        assert_eq!(queue.push('b'), 0);
        assert_eq!(queue.push('c'), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue: FrameQueue<u8> = FrameQueue::new(1);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_concurrent_producer_never_exceeds_capacity() {
        let queue = FrameQueue::new(4);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            for i in 0..1000u32 {
                producer.push(i);
            }
        });

        let mut last = None;
        let mut received = 0;
        while received < 50 {
            assert!(queue.len() <= 4);
            if let Some(v) = queue.pop_timeout(Duration::from_millis(200)) {
                // Order is preserved through evictions
                if let Some(prev) = last {
                    assert!(v > prev);
                }
                last = Some(v);
                received += 1;
            } else {
                break;
            }
        }
        handle.join().unwrap();
        assert!(queue.len() <= 4);
    }
}
