use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use orderflow_core::{OrderId, UserId};
use orderflow_sales::{Order, OrderStatus};

use super::r#trait::{OrderStore, OrderStoreError, check_status_change};

/// In-memory order store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    next_id: AtomicI64,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Persist a new order, assigning the next id. Returns the stored copy.
    pub fn insert(&self, mut order: Order) -> Result<Order, OrderStoreError> {
        let id = OrderId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        order.assign_id(id);

        let mut orders = self
            .orders
            .write()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        orders.insert(id, order.clone());
        Ok(order)
    }

    /// Current status of an order, if present.
    pub fn status_of(&self, id: OrderId) -> Option<OrderStatus> {
        self.orders
            .read()
            .ok()
            .and_then(|orders| orders.get(&id).map(Order::status))
    }

    /// Drop an order (simulates a row deleted between enqueue and processing).
    pub fn remove(&self, id: OrderId) -> Option<Order> {
        self.orders.write().ok().and_then(|mut orders| orders.remove(&id))
    }

    fn sorted_newest_first(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        orders
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        Ok(orders.get(&id).cloned())
    }

    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        let matching = orders
            .values()
            .filter(|o| o.status() == status)
            .cloned()
            .collect();
        Ok(Self::sorted_newest_first(matching))
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        let matching = orders
            .values()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect();
        Ok(Self::sorted_newest_first(matching))
    }

    async fn update(&self, order: &Order) -> Result<bool, OrderStoreError> {
        let Some(id) = order.id_typed() else {
            return Ok(false);
        };
        let mut orders = self
            .orders
            .write()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        match orders.get_mut(&id) {
            Some(existing) => {
                check_status_change(existing.status(), order.status())?;
                *existing = order.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_status_if(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<bool, OrderStoreError> {
        if !expected.can_transition_to(next) {
            return Err(OrderStoreError::InvalidTransition {
                from: expected,
                to: next,
            });
        }

        let mut orders = self
            .orders
            .write()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        let Some(order) = orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.status() != expected {
            return Ok(false);
        }
        order
            .transition_to(next)
            .map_err(|_| OrderStoreError::InvalidTransition {
                from: expected,
                to: next,
            })?;
        Ok(true)
    }

    async fn count(&self) -> Result<u64, OrderStoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| OrderStoreError::Storage("lock poisoned".to_string()))?;
        Ok(orders.len() as u64)
    }
}
