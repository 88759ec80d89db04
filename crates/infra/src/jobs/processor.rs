//! Pipeline coordinator: owns the queue, the worker pool and the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use orderflow_core::OrderId;

use crate::config::{ConfigError, PipelineConfig};
use crate::order_store::OrderStore;
use crate::workers::{OrderWorker, RediscoveryScheduler};

use super::queue::WorkQueue;
use super::run_state::RunState;
use super::stages::{FulfillmentStages, SimulatedStages};
use super::types::{PipelineCounters, PipelineStats};

/// Places order ids on the work queue with a bounded wait.
///
/// Shared by the public `submit` entry point and the rediscovery scheduler.
#[derive(Debug, Clone)]
pub(crate) struct Submitter {
    queue: WorkQueue,
    timeout: Duration,
    counters: Arc<PipelineCounters>,
}

impl Submitter {
    pub(crate) fn new(queue: WorkQueue, timeout: Duration, counters: Arc<PipelineCounters>) -> Self {
        Self {
            queue,
            timeout,
            counters,
        }
    }

    pub(crate) async fn submit(&self, order_id: OrderId) -> bool {
        if self.queue.put(order_id, self.timeout).await {
            PipelineCounters::incr(&self.counters.submitted);
            debug!(%order_id, depth = self.queue.len(), "order submitted");
            true
        } else {
            PipelineCounters::incr(&self.counters.rejected);
            warn!(
                %order_id,
                timeout_ms = self.timeout.as_millis() as u64,
                "work queue full; submission rejected"
            );
            false
        }
    }
}

/// Order fulfillment pipeline.
///
/// Construct one per process and share it (`Arc<OrderProcessor>`) with every
/// caller that submits orders.
///
/// - `start` spawns the worker pool and the rediscovery scheduler
/// - `stop` lets in-flight items finish within the grace period, then aborts
/// - `submit` never blocks longer than the configured submit timeout
///
/// The work queue survives stop/start, so ids submitted while stopped are
/// processed after the next `start`.
pub struct OrderProcessor {
    config: PipelineConfig,
    store: Arc<dyn OrderStore>,
    stages: Arc<dyn FulfillmentStages>,
    queue: WorkQueue,
    run_state: RunState,
    counters: Arc<PipelineCounters>,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl std::fmt::Debug for OrderProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderProcessor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

impl OrderProcessor {
    /// Pipeline whose stages are the configured simulated delays.
    pub fn new<S>(store: S, config: PipelineConfig) -> Result<Self, ConfigError>
    where
        S: OrderStore + 'static,
    {
        let stages = SimulatedStages::new(config.validation_delay, config.fulfillment_delay);
        Self::with_stages(store, stages, config)
    }

    /// Pipeline with caller-supplied validation and fulfillment stages.
    ///
    /// Fails when `config` does not pass [`PipelineConfig::validate`].
    pub fn with_stages<S, F>(
        store: S,
        stages: F,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError>
    where
        S: OrderStore + 'static,
        F: FulfillmentStages + 'static,
    {
        config.validate()?;
        Ok(Self {
            queue: WorkQueue::new(config.queue_capacity),
            store: Arc::new(store),
            stages: Arc::new(stages),
            run_state: RunState::new(),
            counters: Arc::new(PipelineCounters::default()),
            tasks: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the workers and the scheduler. Returns `false` (and does nothing)
    /// if the pipeline is already running.
    pub async fn start(&self) -> bool {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!("order processor already running");
            return false;
        }
        self.run_state.set_running(true);

        let mut set = JoinSet::new();
        for index in 0..self.config.workers {
            let worker = OrderWorker {
                index,
                queue: self.queue.clone(),
                store: Arc::clone(&self.store),
                stages: Arc::clone(&self.stages),
                retry: self.config.retry.clone(),
                poll_timeout: self.config.poll_timeout,
                run_state: self.run_state.subscribe(),
                counters: Arc::clone(&self.counters),
            };
            set.spawn(worker.run());
        }

        let scheduler = RediscoveryScheduler {
            store: Arc::clone(&self.store),
            submitter: self.submitter(),
            interval: self.config.rediscovery_interval,
            run_state: self.run_state.subscribe(),
            counters: Arc::clone(&self.counters),
        };
        set.spawn(scheduler.run());

        *tasks = Some(set);
        info!(
            workers = self.config.workers,
            queue_capacity = self.queue.capacity(),
            queue_depth = self.queue.len(),
            "order processor started"
        );
        true
    }

    /// Stop the pipeline. No-op if it is not running.
    ///
    /// Loops exit at their next run-state check. Tasks still busy after the
    /// grace period are aborted. When this returns no pipeline task is alive.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(mut set) = tasks.take() else {
            debug!("order processor not running");
            return;
        };
        self.run_state.set_running(false);

        let grace = self.config.shutdown_grace;
        info!(grace_ms = grace.as_millis() as u64, "stopping order processor");

        if tokio::time::timeout(grace, drain(&mut set)).await.is_err() {
            warn!(
                remaining = set.len(),
                "shutdown grace period elapsed; aborting in-flight work"
            );
            set.abort_all();
            drain(&mut set).await;
        }

        info!(queue_depth = self.queue.len(), "order processor stopped");
    }

    /// Queue an order for processing, waiting up to the submit timeout for
    /// space. `false` means the queue stayed full; the caller decides whether
    /// to retry.
    pub async fn submit(&self, order_id: OrderId) -> bool {
        self.submitter().submit(order_id).await
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot(self.queue.len(), self.is_running())
    }

    fn submitter(&self) -> Submitter {
        Submitter::new(
            self.queue.clone(),
            self.config.submit_timeout,
            Arc::clone(&self.counters),
        )
    }
}

async fn drain(set: &mut JoinSet<()>) {
    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            if err.is_panic() {
                error!(error = %err, "pipeline task panicked");
            }
        }
    }
}
