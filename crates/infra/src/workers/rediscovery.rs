//! Rediscovery scheduler: periodically re-submits orders left `Pending`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::jobs::processor::Submitter;
use crate::jobs::{PipelineCounters, RunStateRx};
use crate::order_store::OrderStore;

/// Periodic re-scan for orders still `Pending`.
///
/// Catches orders whose submission timed out or that were stored without ever
/// being submitted. Every hit is re-submitted through the same path as
/// external callers, so an order already queued or in flight may get a
/// duplicate work item; the workers' guarded transitions make that harmless.
pub(crate) struct RediscoveryScheduler {
    pub(crate) store: Arc<dyn OrderStore>,
    pub(crate) submitter: Submitter,
    pub(crate) interval: Duration,
    pub(crate) run_state: RunStateRx,
    pub(crate) counters: Arc<PipelineCounters>,
}

impl RediscoveryScheduler {
    pub(crate) async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "rediscovery scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.run_state.stopped() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.scan().await;
        }

        info!("rediscovery scheduler stopped");
    }

    /// One pass: query pending orders and submit each. Returns how many were
    /// accepted onto the queue.
    pub(crate) async fn scan(&self) -> u64 {
        let pending = match self.store.find_pending().await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(error = %err, "rediscovery query failed; retrying next interval");
                return 0;
            }
        };

        if pending.is_empty() {
            debug!("no pending orders to rediscover");
            return 0;
        }

        let found = pending.len();
        let mut resubmitted = 0;
        for order in pending {
            if !self.run_state.is_running() {
                debug!("pipeline stopping; abandoning rediscovery batch");
                break;
            }
            let Some(order_id) = order.id_typed() else {
                continue;
            };
            if self.submitter.submit(order_id).await {
                resubmitted += 1;
            }
        }

        PipelineCounters::add(&self.counters.rediscovered, resubmitted);
        info!(found, resubmitted, "rediscovery scan complete");
        resubmitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{RunState, WorkQueue};
    use crate::order_store::InMemoryOrderStore;
    use orderflow_core::UserId;
    use orderflow_sales::Order;

    fn scheduler(
        store: Arc<InMemoryOrderStore>,
        queue: &WorkQueue,
        run_state: &RunState,
        interval: Duration,
    ) -> RediscoveryScheduler {
        let counters = Arc::new(PipelineCounters::default());
        RediscoveryScheduler {
            store,
            submitter: Submitter::new(queue.clone(), Duration::from_millis(20), counters.clone()),
            interval,
            run_state: run_state.subscribe(),
            counters,
        }
    }

    fn seed(store: &InMemoryOrderStore) -> (Order, Order) {
        let pending = store.insert(Order::new(UserId::new(1), "1 Main St")).unwrap();

        let mut done = Order::new(UserId::new(2), "2 Main St");
        done.process().unwrap();
        done.complete().unwrap();
        let done = store.insert(done).unwrap();
        (pending, done)
    }

    #[tokio::test]
    async fn scan_submits_only_pending_orders() {
        let store = Arc::new(InMemoryOrderStore::new());
        let (pending, _done) = seed(&store);

        let queue = WorkQueue::new(10);
        let run_state = RunState::new();
        run_state.set_running(true);
        let s = scheduler(store, &queue, &run_state, Duration::from_secs(60));

        assert_eq!(s.scan().await, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(Duration::from_millis(10)).await, pending.id_typed());
        assert_eq!(s.counters.snapshot(0, true).rediscovered, 1);
    }

    #[tokio::test]
    async fn scan_stops_submitting_once_stopped() {
        let store = Arc::new(InMemoryOrderStore::new());
        seed(&store);

        let queue = WorkQueue::new(10);
        let run_state = RunState::new();
        let s = scheduler(store, &queue, &run_state, Duration::from_secs(60));

        assert_eq!(s.scan().await, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn run_rescans_every_interval() {
        let store = Arc::new(InMemoryOrderStore::new());
        seed(&store);

        let queue = WorkQueue::new(10);
        let run_state = RunState::new();
        run_state.set_running(true);
        let s = scheduler(store, &queue, &run_state, Duration::from_millis(40));

        let handle = tokio::spawn(s.run());
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(queue.len() >= 2);

        run_state.set_running(false);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should exit")
            .unwrap();
    }
}
