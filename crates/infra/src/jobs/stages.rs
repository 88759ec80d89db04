//! The two processing stages an order passes through.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use orderflow_sales::Order;

/// Failure reported by a stage. The worker logs it and abandons the item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The order was refused (payment declined, stock unavailable, ...).
    #[error("order rejected: {0}")]
    Rejected(String),

    /// The downstream system could not be reached.
    #[error("stage unavailable: {0}")]
    Unavailable(String),
}

/// Validation/payment and fulfillment steps run between status transitions.
///
/// Implementations must not hold a store connection: the worker has released
/// its connection by the time a stage runs.
#[async_trait::async_trait]
pub trait FulfillmentStages: Send + Sync {
    /// Runs before `Pending -> Processing`.
    async fn validate(&self, order: &Order) -> Result<(), StageError>;

    /// Runs before `Processing -> Completed`.
    async fn fulfill(&self, order: &Order) -> Result<(), StageError>;
}

#[async_trait::async_trait]
impl<T> FulfillmentStages for Arc<T>
where
    T: FulfillmentStages + ?Sized,
{
    async fn validate(&self, order: &Order) -> Result<(), StageError> {
        (**self).validate(order).await
    }

    async fn fulfill(&self, order: &Order) -> Result<(), StageError> {
        (**self).fulfill(order).await
    }
}

/// Stand-in stages that only wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedStages {
    pub validation_delay: Duration,
    pub fulfillment_delay: Duration,
}

impl SimulatedStages {
    pub fn new(validation_delay: Duration, fulfillment_delay: Duration) -> Self {
        Self {
            validation_delay,
            fulfillment_delay,
        }
    }
}

impl Default for SimulatedStages {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(3))
    }
}

#[async_trait::async_trait]
impl FulfillmentStages for SimulatedStages {
    async fn validate(&self, _order: &Order) -> Result<(), StageError> {
        tokio::time::sleep(self.validation_delay).await;
        Ok(())
    }

    async fn fulfill(&self, _order: &Order) -> Result<(), StageError> {
        tokio::time::sleep(self.fulfillment_delay).await;
        Ok(())
    }
}
