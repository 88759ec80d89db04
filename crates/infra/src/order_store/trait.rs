use std::sync::Arc;

use thiserror::Error;

use orderflow_core::{OrderId, UserId};
use orderflow_sales::{Order, OrderStatus};

/// Order store operation error.
///
/// These are **infrastructure errors** (storage, decoding, rejected writes) as
/// opposed to domain errors. Callers inside the pipeline log them and move on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderStoreError {
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("failed to decode order row: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl OrderStoreError {
    /// Whether the failure is worth another attempt under a retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrderStoreError::Storage(_))
    }
}

/// Guard for whole-order writes: keeping the persisted status is always fine,
/// changing it must follow the lifecycle.
pub(crate) fn check_status_change(
    persisted: OrderStatus,
    next: OrderStatus,
) -> Result<(), OrderStoreError> {
    if persisted == next || persisted.can_transition_to(next) {
        Ok(())
    } else {
        Err(OrderStoreError::InvalidTransition {
            from: persisted,
            to: next,
        })
    }
}

/// Durable record of orders and their status.
///
/// The fulfillment pipeline only reads orders and moves their status; creating
/// orders belongs to the order-intake path.
///
/// ## Connection use
///
/// Implementations acquire a connection per call. Nothing is held between
/// calls, so a worker sleeping through a stage does not pin a connection.
#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    /// Point lookup; `Ok(None)` when the order does not exist.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError>;

    /// All orders currently in `status`.
    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError>;

    /// All orders placed by a user, newest first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderStoreError>;

    /// Overwrite an existing order row and its items. Returns `false` when no
    /// row matched.
    ///
    /// A status different from the persisted one must be a legal move from it
    /// (`InvalidTransition` otherwise), so a stale copy cannot drag a finished
    /// order back to `Pending`.
    async fn update(&self, order: &Order) -> Result<bool, OrderStoreError>;

    /// Conditional status write: moves `id` to `next` only if it is currently
    /// `expected`. Returns `false` when the persisted status differs (or the
    /// order is gone), so concurrent writers cannot both win.
    async fn update_status_if(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, OrderStoreError>;

    /// Number of stored orders.
    async fn count(&self) -> Result<u64, OrderStoreError>;

    /// Orders waiting to enter the pipeline.
    async fn find_pending(&self) -> Result<Vec<Order>, OrderStoreError> {
        self.find_by_status(OrderStatus::Pending).await
    }
}

#[async_trait::async_trait]
impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError> {
        (**self).find_by_status(status).await
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderStoreError> {
        (**self).find_by_user(user_id).await
    }

    async fn update(&self, order: &Order) -> Result<bool, OrderStoreError> {
        (**self).update(order).await
    }

    async fn update_status_if(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, OrderStoreError> {
        (**self).update_status_if(id, expected, next).await
    }

    async fn count(&self) -> Result<u64, OrderStoreError> {
        (**self).count().await
    }

    async fn find_pending(&self) -> Result<Vec<Order>, OrderStoreError> {
        (**self).find_pending().await
    }
}
