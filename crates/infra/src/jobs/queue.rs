//! Bounded work queue of order ids.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use orderflow_core::OrderId;

use crate::config::MAX_QUEUE_CAPACITY;

/// Bounded FIFO handoff between producers (`submit`, rediscovery) and workers.
///
/// - `put` waits for space up to a timeout and reports the outcome
/// - `take` waits for an item up to a timeout
/// - consumers share the receiving end; each item is handed to exactly one
///
/// The queue lives as long as the coordinator, across start/stop cycles, so
/// items submitted while stopped are picked up after the next start.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<OrderId>,
    rx: Arc<Mutex<mpsc::Receiver<OrderId>>>,
}

impl WorkQueue {
    /// A queue holding at most `capacity` items, clamped to
    /// `1..=MAX_QUEUE_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue, waiting up to `timeout` for space. `false` means the queue
    /// stayed full for the whole timeout.
    pub async fn put(&self, order_id: OrderId, timeout: Duration) -> bool {
        self.tx.send_timeout(order_id, timeout).await.is_ok()
    }

    /// Dequeue, waiting up to `timeout` for an item.
    pub async fn take(&self, timeout: Duration) -> Option<OrderId> {
        tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn fifo_put_take() {
        let queue = WorkQueue::new(4);
        assert!(queue.put(OrderId::new(1), SHORT).await);
        assert!(queue.put(OrderId::new(2), SHORT).await);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.take(SHORT).await, Some(OrderId::new(1)));
        assert_eq!(queue.take(SHORT).await, Some(OrderId::new(2)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn take_times_out_on_empty_queue() {
        let queue = WorkQueue::new(1);
        let started = Instant::now();
        assert_eq!(queue.take(SHORT).await, None);
        assert!(started.elapsed() >= SHORT);
    }

    #[tokio::test]
    async fn put_times_out_when_full() {
        let queue = WorkQueue::new(2);
        assert!(queue.put(OrderId::new(1), SHORT).await);
        assert!(queue.put(OrderId::new(2), SHORT).await);

        let started = Instant::now();
        assert!(!queue.put(OrderId::new(3), SHORT).await);
        assert!(started.elapsed() >= SHORT);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn put_unblocks_when_space_frees_up() {
        let queue = WorkQueue::new(1);
        assert!(queue.put(OrderId::new(1), SHORT).await);

        let consumer = queue.clone();
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            consumer.take(SHORT).await
        });

        assert!(queue.put(OrderId::new(2), Duration::from_secs(2)).await);
        assert_eq!(drain.await.unwrap(), Some(OrderId::new(1)));
        assert_eq!(queue.take(SHORT).await, Some(OrderId::new(2)));
    }

    #[test]
    fn capacity_is_clamped_to_what_the_channel_can_hold() {
        assert_eq!(WorkQueue::new(0).capacity(), 1);
        assert_eq!(WorkQueue::new(usize::MAX).capacity(), MAX_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn duplicates_are_kept() {
        let queue = WorkQueue::new(3);
        assert!(queue.put(OrderId::new(7), SHORT).await);
        assert!(queue.put(OrderId::new(7), SHORT).await);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn each_item_goes_to_one_consumer() {
        let queue = WorkQueue::new(10);
        for i in 1..=10 {
            assert!(queue.put(OrderId::new(i), SHORT).await);
        }

        let mut handles = Vec::new();
        for _ in 0..3 {
            let q = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(id) = q.take(SHORT).await {
                    got.push(id.get());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (1..=10).collect::<Vec<_>>());
    }
}
