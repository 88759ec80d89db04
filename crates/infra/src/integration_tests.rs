//! Integration tests for the full fulfillment pipeline.
//!
//! Tests: submit → WorkQueue → OrderWorker → OrderStore, plus rediscovery
//!
//! Verifies:
//! - Orders reach `Completed` with exactly two status writes
//! - Duplicate work items never repeat a transition
//! - Backpressure: a full queue makes `submit` fail after its timeout
//! - `stop` leaves no task able to write to the store

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use orderflow_core::{OrderId, ProductId, UserId};
    use orderflow_sales::{Order, OrderItem, OrderStatus};

    use crate::config::PipelineConfig;
    use crate::jobs::{FulfillmentStages, OrderProcessor, RetryPolicy, StageError};
    use crate::order_store::{InMemoryOrderStore, OrderStore, OrderStoreError};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct StatusWrite {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        applied: bool,
    }

    /// Wraps the in-memory store, recording every conditional status write and
    /// optionally failing the next few of them.
    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryOrderStore,
        writes: Mutex<Vec<StatusWrite>>,
        failing_writes: AtomicU32,
    }

    impl RecordingStore {
        fn insert(&self, order: Order) -> OrderId {
            self.inner.insert(order).unwrap().id_typed().unwrap()
        }

        fn status_of(&self, id: OrderId) -> Option<OrderStatus> {
            self.inner.status_of(id)
        }

        fn fail_next_writes(&self, n: u32) {
            self.failing_writes.store(n, Ordering::SeqCst);
        }

        fn writes_for(&self, id: OrderId) -> Vec<StatusWrite> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|w| w.order_id == id)
                .copied()
                .collect()
        }

        fn applied_writes_for(&self, id: OrderId) -> Vec<(OrderStatus, OrderStatus)> {
            self.writes_for(id)
                .into_iter()
                .filter(|w| w.applied)
                .map(|w| (w.from, w.to))
                .collect()
        }

        fn total_writes(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl OrderStore for RecordingStore {
        async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError> {
            self.inner.find_by_status(status).await
        }

        async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderStoreError> {
            self.inner.find_by_user(user_id).await
        }

        async fn update(&self, order: &Order) -> Result<bool, OrderStoreError> {
            self.inner.update(order).await
        }

        async fn update_status_if(
            &self,
            id: OrderId,
            expected: OrderStatus,
            next: OrderStatus,
        ) -> Result<bool, OrderStoreError> {
            let fail = self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(OrderStoreError::Storage("connection reset".to_string()));
            }

            let applied = self.inner.update_status_if(id, expected, next).await?;
            self.writes.lock().unwrap().push(StatusWrite {
                order_id: id,
                from: expected,
                to: next,
                applied,
            });
            Ok(applied)
        }

        async fn count(&self) -> Result<u64, OrderStoreError> {
            self.inner.count().await
        }
    }

    fn pending_order(user: i64) -> Order {
        Order::new(UserId::new(user), "221B Baker Street").with_item(OrderItem::new(
            ProductId::new(10),
            "Lamp",
            1,
            2_500,
        ))
    }

    fn completed_order(user: i64) -> Order {
        let mut order = pending_order(user);
        order.process().unwrap();
        order.complete().unwrap();
        order
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::default()
            .with_poll_timeout(Duration::from_millis(20))
            .with_submit_timeout(Duration::from_millis(200))
            .with_rediscovery_interval(Duration::from_secs(60))
            .with_shutdown_grace(Duration::from_secs(5))
            .with_stage_delays(Duration::from_millis(20), Duration::from_millis(30))
    }

    async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    async fn wait_for_status(store: &RecordingStore, id: OrderId, status: OrderStatus) -> bool {
        eventually(Duration::from_secs(3), || {
            store.status_of(id) == Some(status)
        })
        .await
    }

    #[tokio::test]
    async fn submitted_order_completes_with_two_status_writes() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(1));

        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        assert!(processor.start().await);
        assert!(processor.submit(id).await);

        assert!(wait_for_status(&store, id, OrderStatus::Completed).await);
        processor.stop().await;

        assert_eq!(
            store.applied_writes_for(id),
            vec![
                (OrderStatus::Pending, OrderStatus::Processing),
                (OrderStatus::Processing, OrderStatus::Completed),
            ]
        );
        assert_eq!(store.writes_for(id).len(), 2);

        let stats = processor.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.submitted, 1);
    }

    #[tokio::test]
    async fn duplicate_submissions_apply_each_transition_once() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(1));

        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        processor.start().await;
        for _ in 0..5 {
            assert!(processor.submit(id).await);
        }

        assert!(wait_for_status(&store, id, OrderStatus::Completed).await);
        assert!(
            eventually(Duration::from_secs(3), || {
                let stats = processor.stats();
                stats.processed == 5 && stats.completed + stats.skipped == 5
            })
            .await
        );
        processor.stop().await;

        assert_eq!(
            store.applied_writes_for(id),
            vec![
                (OrderStatus::Pending, OrderStatus::Processing),
                (OrderStatus::Processing, OrderStatus::Completed),
            ]
        );
        assert_eq!(processor.stats().completed, 1);
    }

    #[tokio::test]
    async fn many_orders_all_complete() {
        let store = Arc::new(RecordingStore::default());
        let ids: Vec<OrderId> = (1..=12).map(|u| store.insert(pending_order(u))).collect();

        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        processor.start().await;
        for id in &ids {
            assert!(processor.submit(*id).await);
        }

        for id in &ids {
            assert!(wait_for_status(&store, *id, OrderStatus::Completed).await);
        }
        processor.stop().await;
        assert_eq!(store.total_writes(), ids.len() * 2);
    }

    #[tokio::test]
    async fn completed_orders_are_not_rediscovered() {
        let store = Arc::new(RecordingStore::default());
        let done = store.insert(completed_order(2));

        let pending = store.find_pending().await.unwrap();
        assert!(pending.iter().all(|o| o.id_typed() != Some(done)));

        let config = fast_config().with_rediscovery_interval(Duration::from_millis(30));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        processor.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        processor.stop().await;

        assert_eq!(processor.stats().rediscovered, 0);
        assert_eq!(store.total_writes(), 0);
        assert_eq!(store.status_of(done), Some(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn unsubmitted_pending_order_is_rediscovered() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(3));

        let config = fast_config().with_rediscovery_interval(Duration::from_millis(50));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        processor.start().await;

        assert!(wait_for_status(&store, id, OrderStatus::Completed).await);
        processor.stop().await;

        assert!(processor.stats().rediscovered >= 1);
        assert_eq!(store.applied_writes_for(id).len(), 2);
    }

    #[tokio::test]
    async fn submit_fails_after_timeout_once_queue_is_full() {
        let store = Arc::new(RecordingStore::default());
        let config = fast_config().with_submit_timeout(Duration::from_millis(150));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        assert!(!processor.is_running());

        for i in 1..=100 {
            assert!(processor.submit(OrderId::new(i)).await, "submit #{i}");
        }
        assert_eq!(processor.queue_depth(), 100);

        let started = Instant::now();
        assert!(!processor.submit(OrderId::new(101)).await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150));
        assert!(waited < Duration::from_secs(2));

        assert_eq!(processor.queue_depth(), 100);
        assert_eq!(processor.stats().rejected, 1);
    }

    #[tokio::test]
    async fn orders_submitted_while_stopped_run_after_start() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(4));

        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        assert!(processor.submit(id).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.status_of(id), Some(OrderStatus::Pending));

        processor.start().await;
        assert!(wait_for_status(&store, id, OrderStatus::Completed).await);
        processor.stop().await;
        assert_eq!(processor.queue_depth(), 0);
    }

    #[tokio::test]
    async fn missing_order_is_dropped() {
        let store = Arc::new(RecordingStore::default());
        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        processor.start().await;

        assert!(processor.submit(OrderId::new(999)).await);
        assert!(
            eventually(Duration::from_secs(2), || {
                processor.stats().not_found == 1
            })
            .await
        );
        processor.stop().await;

        assert_eq!(processor.queue_depth(), 0);
        assert_eq!(store.total_writes(), 0);
    }

    #[tokio::test]
    async fn order_cancelled_mid_flight_is_not_completed() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(5));

        let config = fast_config().with_stage_delays(Duration::ZERO, Duration::from_millis(300));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        processor.start().await;
        assert!(processor.submit(id).await);

        assert!(wait_for_status(&store, id, OrderStatus::Processing).await);
        assert!(
            store
                .inner
                .update_status_if(id, OrderStatus::Processing, OrderStatus::Cancelled)
                .await
                .unwrap()
        );

        assert!(
            eventually(Duration::from_secs(2), || {
                processor.stats().skipped == 1
            })
            .await
        );
        processor.stop().await;

        assert_eq!(store.status_of(id), Some(OrderStatus::Cancelled));
        assert_eq!(
            store.applied_writes_for(id),
            vec![(OrderStatus::Pending, OrderStatus::Processing)]
        );
    }

    #[tokio::test]
    async fn persistence_failure_abandons_item_by_default() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(6));
        store.fail_next_writes(1);

        let processor = OrderProcessor::new(Arc::clone(&store), fast_config()).unwrap();
        processor.start().await;
        assert!(processor.submit(id).await);

        assert!(
            eventually(Duration::from_secs(2), || {
                processor.stats().failed == 1
            })
            .await
        );
        processor.stop().await;

        assert_eq!(store.status_of(id), Some(OrderStatus::Pending));
        assert!(store.writes_for(id).is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_is_retried_under_policy() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(7));
        store.fail_next_writes(2);

        let config =
            fast_config().with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(10)));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        processor.start().await;
        assert!(processor.submit(id).await);

        assert!(wait_for_status(&store, id, OrderStatus::Completed).await);
        processor.stop().await;
        assert_eq!(processor.stats().failed, 0);
    }

    #[tokio::test]
    async fn no_store_writes_after_stop_returns() {
        let store = Arc::new(RecordingStore::default());
        let ids: Vec<OrderId> = (1..=6).map(|u| store.insert(pending_order(u))).collect();

        let config = fast_config().with_stage_delays(Duration::from_millis(40), Duration::from_millis(40));
        let processor = OrderProcessor::new(Arc::clone(&store), config).unwrap();
        processor.start().await;
        for id in &ids {
            assert!(processor.submit(*id).await);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        processor.stop().await;
        assert!(!processor.is_running());
        let writes_at_stop = store.total_writes();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.total_writes(), writes_at_stop);
        assert!(processor.queue_depth() <= ids.len());
    }

    /// Validation that never finishes on its own.
    struct StuckStages;

    #[async_trait::async_trait]
    impl FulfillmentStages for StuckStages {
        async fn validate(&self, _order: &Order) -> Result<(), StageError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn fulfill(&self, _order: &Order) -> Result<(), StageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_aborts_work_still_running_after_grace() {
        let store = Arc::new(RecordingStore::default());
        let id = store.insert(pending_order(8));

        let config = fast_config().with_shutdown_grace(Duration::from_millis(100));
        let processor =
            OrderProcessor::with_stages(Arc::clone(&store), StuckStages, config).unwrap();
        processor.start().await;
        assert!(processor.submit(id).await);
        assert!(
            eventually(Duration::from_secs(2), || {
                processor.stats().processed == 1
            })
            .await
        );

        let started = Instant::now();
        processor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!processor.is_running());

        assert_eq!(store.status_of(id), Some(OrderStatus::Pending));
        assert_eq!(store.total_writes(), 0);
    }
}
