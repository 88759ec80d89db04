//! Infrastructure layer: order storage, configuration and the fulfillment
//! pipeline.

pub mod config;
pub mod db;
pub mod jobs;
pub mod order_store;

mod workers;

mod integration_tests;

pub use config::{ConfigError, DatabaseConfig, PipelineConfig};
pub use jobs::{OrderProcessor, PipelineStats, RetryPolicy};
pub use order_store::{InMemoryOrderStore, OrderStore, OrderStoreError, PostgresOrderStore};
