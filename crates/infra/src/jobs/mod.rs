//! Order fulfillment pipeline.
//!
//! ## Design
//!
//! - Producers hand order ids (never order snapshots) to a bounded queue
//! - A fixed pool of workers re-reads each order and drives it through
//!   `Pending -> Processing -> Completed` with guarded, conditional writes
//! - A scheduler periodically re-submits orders left `Pending`
//! - Store failures are logged and the item dropped unless a retry policy
//!   says otherwise
//!
//! ## Components
//!
//! - `OrderProcessor`: lifecycle (`start`/`stop`) and the `submit` entry point
//! - `WorkQueue`: bounded FIFO with timed `put`/`take`
//! - `FulfillmentStages`: validation and fulfillment steps between transitions
//! - `RetryPolicy`: optional retries for store calls (none by default)

pub mod processor;
pub mod queue;
pub mod run_state;
pub mod stages;
pub mod types;

pub use processor::OrderProcessor;
pub use queue::WorkQueue;
pub use run_state::{RunState, RunStateRx};
pub use stages::{FulfillmentStages, SimulatedStages, StageError};
pub use types::{BackoffStrategy, PipelineStats, RetryPolicy};

pub(crate) use types::PipelineCounters;
