//! Order worker: drains the work queue and drives each order from `Pending`
//! through `Processing` to `Completed`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use orderflow_core::OrderId;
use orderflow_sales::OrderStatus;

use crate::jobs::{FulfillmentStages, PipelineCounters, RetryPolicy, RunStateRx, WorkQueue};
use crate::order_store::{OrderStore, OrderStoreError};

/// What happened to one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    /// Driven all the way to `Completed`.
    Completed,
    /// A guard did not match; someone else owns or finished the order.
    Skipped,
    /// The order no longer exists.
    NotFound,
    /// A store call or stage failed; left at its last committed status.
    Failed,
}

/// One member of the worker pool.
///
/// Loops while the pipeline is running: take an id, re-read the order, then
/// run the two guarded transitions around the validation and fulfillment
/// stages. Each transition is a conditional write against the persisted
/// status, so duplicate work items for the same order are harmless.
pub(crate) struct OrderWorker {
    pub(crate) index: usize,
    pub(crate) queue: WorkQueue,
    pub(crate) store: Arc<dyn OrderStore>,
    pub(crate) stages: Arc<dyn FulfillmentStages>,
    pub(crate) retry: RetryPolicy,
    pub(crate) poll_timeout: Duration,
    pub(crate) run_state: RunStateRx,
    pub(crate) counters: Arc<PipelineCounters>,
}

impl OrderWorker {
    pub(crate) async fn run(self) {
        info!(worker = self.index, "order worker started");

        while self.run_state.is_running() {
            let next = tokio::select! {
                biased;
                _ = self.run_state.stopped() => break,
                item = self.queue.take(self.poll_timeout) => item,
            };
            let Some(order_id) = next else {
                continue;
            };

            PipelineCounters::incr(&self.counters.processed);
            let outcome = self.process(order_id).await;
            self.record(outcome);
        }

        info!(worker = self.index, "order worker stopped");
    }

    fn record(&self, outcome: ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Completed => &self.counters.completed,
            ItemOutcome::Skipped => &self.counters.skipped,
            ItemOutcome::NotFound => &self.counters.not_found,
            ItemOutcome::Failed => &self.counters.failed,
        };
        PipelineCounters::incr(counter);
    }

    #[instrument(skip(self), fields(worker = self.index))]
    pub(crate) async fn process(&self, order_id: OrderId) -> ItemOutcome {
        let store = &self.store;

        let order = match self
            .with_retry("find_by_id", order_id, move || store.find_by_id(order_id))
            .await
        {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(%order_id, "order not found; dropping work item");
                return ItemOutcome::NotFound;
            }
            Err(err) => {
                error!(%order_id, error = %err, "failed to load order; abandoning work item");
                return ItemOutcome::Failed;
            }
        };

        if order.status() != OrderStatus::Pending {
            debug!(%order_id, status = %order.status(), "order not pending; skipping");
            return ItemOutcome::Skipped;
        }

        if let Err(err) = self.stages.validate(&order).await {
            warn!(%order_id, error = %err, "validation stage failed; abandoning work item");
            return ItemOutcome::Failed;
        }

        match self
            .transition(order_id, OrderStatus::Pending, OrderStatus::Processing)
            .await
        {
            Some(true) => {}
            Some(false) => return ItemOutcome::Skipped,
            None => return ItemOutcome::Failed,
        }

        if let Err(err) = self.stages.fulfill(&order).await {
            warn!(%order_id, error = %err, "fulfillment stage failed; abandoning work item");
            return ItemOutcome::Failed;
        }

        match self
            .transition(order_id, OrderStatus::Processing, OrderStatus::Completed)
            .await
        {
            Some(true) => {
                info!(%order_id, "order completed");
                ItemOutcome::Completed
            }
            Some(false) => ItemOutcome::Skipped,
            None => ItemOutcome::Failed,
        }
    }

    /// Guarded status write. `Some(applied)` on a store answer, `None` when
    /// the write failed and the item must be abandoned.
    async fn transition(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Option<bool> {
        let store = &self.store;
        let result = self
            .with_retry("update_status_if", order_id, move || {
                store.update_status_if(order_id, expected, next)
            })
            .await;

        match result {
            Ok(true) => {
                debug!(%order_id, from = %expected, to = %next, "status updated");
                Some(true)
            }
            Ok(false) => {
                debug!(%order_id, expected = %expected, "status changed underneath; skipping");
                Some(false)
            }
            Err(err) => {
                error!(
                    %order_id,
                    from = %expected,
                    to = %next,
                    error = %err,
                    "failed to persist status; abandoning work item"
                );
                None
            }
        }
    }

    /// Run a store call under the retry policy. Only storage errors are
    /// retried, and a pending retry wait ends early once the pipeline stops.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        order_id: OrderId,
        mut call: F,
    ) -> Result<T, OrderStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrderStoreError>>,
    {
        let mut retries = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(
                        %order_id,
                        op,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store call failed; retrying"
                    );
                    tokio::select! {
                        _ = self.run_state.stopped() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
