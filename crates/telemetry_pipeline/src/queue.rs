//! Bounded FIFO buffer shared between producers and one batch processor.
//!
//! Producers (request handlers, possibly on many threads) call
//! [`SignalQueue::enqueue`], which never waits on the consumer: when the queue
//! is at capacity the *incoming* item is rejected and counted. Items already
//! queued are never evicted, so an overflow cannot lose data that was
//! accepted earlier.
//!
//! The single consumer calls [`SignalQueue::drain`], which removes up to `n`
//! items in enqueue order under the same lock, so no item is returned twice.

#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_drain_accounted, debug_assert_queue_bounded};
use crate::QueueError;
use crossbeam_utils::CachePadded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

pub struct SignalQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Queue length at which the consumer is woken early.
    batch_threshold: usize,
    closed: AtomicBool,
    enqueued: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    batch_ready: Notify,
}

impl<T> SignalQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// The batch-ready signal fires once the queue holds `capacity` items;
    /// use [`with_batch_threshold`](Self::with_batch_threshold) to lower it.
    pub fn new(capacity: usize) -> Self {
        Self::with_batch_threshold(capacity, capacity)
    }

    pub fn with_batch_threshold(capacity: usize, batch_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            batch_threshold: batch_threshold.clamp(1, capacity),
            closed: AtomicBool::new(false),
            enqueued: CachePadded::new(AtomicU64::new(0)),
            dropped: CachePadded::new(AtomicU64::new(0)),
            batch_ready: Notify::new(),
        }
    }

    // A panic while holding the lock cannot leave the VecDeque half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item` without blocking.
    ///
    /// Returns `Err(QueueError::Overflow)` if the queue is full and
    /// `Err(QueueError::Closed)` after [`close`](Self::close). In both cases
    /// the item is dropped and the dropped counter incremented.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(QueueError::Closed);
        }

        let len = {
            let mut items = self.lock();
            // close() flips the flag under this lock, so nothing lands after the final drain
            if self.is_closed() {
                drop(items);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Closed);
            }
            if items.len() >= self.capacity {
                drop(items);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Overflow {
                    capacity: self.capacity,
                });
            }
            items.push_back(item);
            items.len()
        };

        #[cfg(debug_assertions)]
        debug_assert_queue_bounded!(len, self.capacity);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if len >= self.batch_threshold {
            self.batch_ready.notify_one();
        }
        Ok(())
    }

    /// Removes up to `max_n` items in FIFO order.
    pub fn drain(&self, max_n: usize) -> Vec<T> {
        let mut items = self.lock();
        let before = items.len();
        let n = max_n.min(before);
        let drained: Vec<T> = items.drain(..n).collect();

        #[cfg(debug_assertions)]
        debug_assert_drain_accounted!(before, drained.len(), items.len());

        drained
    }

    /// Like [`drain`](Self::drain), publishing the drained count to
    /// `inflight` before the lock is released, so [`pending`](Self::pending)
    /// never misses items that are between the queue and the exporter.
    pub(crate) fn drain_tracked(&self, max_n: usize, inflight: &AtomicUsize) -> Vec<T> {
        let mut items = self.lock();
        let n = max_n.min(items.len());
        let drained: Vec<T> = items.drain(..n).collect();
        inflight.store(drained.len(), Ordering::Relaxed);
        drained
    }

    /// Items still queued plus the `inflight` count, read under one lock.
    pub(crate) fn pending(&self, inflight: &AtomicUsize) -> usize {
        let items = self.lock();
        items.len() + inflight.load(Ordering::Relaxed)
    }

    /// Waits until the queue reaches its batch threshold.
    ///
    /// A signal raised while nobody was waiting is kept, so a consumer that
    /// was busy exporting still observes it on its next wait.
    pub async fn batch_ready(&self) {
        self.batch_ready.notified().await;
    }

    /// Rejects all further enqueues. Items already queued stay drainable.
    pub fn close(&self) {
        let _items = self.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    /// Items accepted since creation.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Items rejected because of overflow or closure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_overflow_drops_newest() {
        let queue = SignalQueue::new(3);

        for item in ['A', 'B', 'C'] {
            queue.enqueue(item).unwrap();
        }
        assert_eq!(
            queue.enqueue('D'),
            Err(QueueError::Overflow { capacity: 3 })
        );

        assert_eq!(queue.drain(10), vec!['A', 'B', 'C']);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.enqueued_count(), 3);
    }

    #[test]
    fn test_drain_respects_max_and_order() {
        let queue = SignalQueue::new(100);
        for i in 0..10 {
            queue.enqueue(i).unwrap();
        }

        assert_eq!(queue.drain(4), vec![0, 1, 2, 3]);
        assert_eq!(queue.drain(4), vec![4, 5, 6, 7]);
        assert_eq!(queue.drain(4), vec![8, 9]);
        assert!(queue.drain(4).is_empty());
    }

    #[test]
    fn test_closed_queue_rejects_but_drains() {
        let queue = SignalQueue::new(8);
        queue.enqueue(1).unwrap();
        queue.close();

        assert_eq!(queue.enqueue(2), Err(QueueError::Closed));
        assert_eq!(queue.drain(8), vec![1]);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[test]
    fn test_space_frees_after_drain() {
        let queue = SignalQueue::new(2);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert!(queue.enqueue(3).is_err());

        queue.drain(1);
        queue.enqueue(4).unwrap();
        assert_eq!(queue.drain(10), vec![2, 4]);
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(SignalQueue::new(1000));
        let mut handles = vec![];

        for producer in 0..8u64 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for seq in 0..500u64 {
                    let _ = queue.enqueue((producer, seq));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.enqueued_count() + queue.dropped_count(), 4000);

        // per-producer FIFO survives interleaving
        let drained = queue.drain(usize::MAX);
        for producer in 0..8u64 {
            let seqs: Vec<u64> = drained
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, s)| *s)
                .collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_batch_ready_fires_at_threshold() {
        let queue = Arc::new(SignalQueue::with_batch_threshold(16, 4));
        for i in 0..3 {
            queue.enqueue(i).unwrap();
        }

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.batch_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(3).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("batch_ready should fire")
            .unwrap();
    }

    #[test]
    fn test_enqueue_racing_close_never_lands_after_final_drain() {
        let queue = Arc::new(SignalQueue::new(1_000_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut accepted = 0u64;
                    for i in 0..20_000u64 {
                        if queue.enqueue(i).is_ok() {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(2));
        queue.close();
        let drained = queue.drain(usize::MAX).len() as u64;

        let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(queue.is_empty());
        assert_eq!(drained, accepted);
        assert_eq!(queue.enqueued_count() + queue.dropped_count(), 80_000);
    }

    #[test]
    fn test_tracked_drain_keeps_items_pending() {
        let queue = SignalQueue::new(8);
        let inflight = AtomicUsize::new(0);
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }

        let batch = queue.drain_tracked(3, &inflight);
        assert_eq!(batch, vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending(&inflight), 5);

        inflight.store(0, Ordering::Relaxed);
        assert_eq!(queue.pending(&inflight), 2);
    }
}
