use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, DomainResult, Entity, OrderId, ProductId, UserId};

/// Order status lifecycle.
///
/// Moves monotonically `Pending -> Processing -> Completed`, or to `Cancelled`
/// from `Pending` or `Processing` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Storage representation (matches the `order_status` enum labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether `self -> next` is a legal lifecycle move.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Cancelled)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown order status: {s}")))
    }
}

/// Order item: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: i64,
        unit_price: u64,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// `unit_price * quantity`, zero for non-positive quantities.
    pub fn subtotal(&self) -> u64 {
        u64::try_from(self.quantity)
            .map(|q| self.unit_price.saturating_mul(q))
            .unwrap_or(0)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }
}

/// An order as persisted by the order store.
///
/// `id` is `None` until the store assigns one on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: Option<OrderId>,
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    shipping_address: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh `Pending` order with no items.
    pub fn new(user_id: UserId, shipping_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id,
            items: Vec::new(),
            status: OrderStatus::Pending,
            shipping_address: shipping_address.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an order from its stored columns.
    pub fn rehydrate(
        id: OrderId,
        user_id: UserId,
        shipping_address: String,
        status: OrderStatus,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Some(id),
            user_id,
            items,
            status,
            shipping_address,
            created_at,
            updated_at,
        }
    }

    pub fn with_item(mut self, item: OrderItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn assign_id(&mut self, id: OrderId) {
        self.id = Some(id);
    }

    pub fn id_typed(&self) -> Option<OrderId> {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Sum of item subtotals.
    pub fn total_amount(&self) -> u64 {
        self.items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.subtotal()))
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }

    pub fn add_item(&mut self, item: OrderItem) -> DomainResult<()> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once processing has started",
            ));
        }
        item.validate()?;
        self.items.push(item);
        self.touch();
        Ok(())
    }

    /// Removes every item for `product_id`; returns whether anything was removed.
    pub fn remove_item(&mut self, product_id: ProductId) -> DomainResult<bool> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "cannot modify order once processing has started",
            ));
        }
        let before = self.items.len();
        self.items.retain(|item| item.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    pub fn set_shipping_address(&mut self, address: impl Into<String>) {
        self.shipping_address = address.into();
        self.touch();
    }

    /// `Pending -> Processing`.
    pub fn process(&mut self) -> DomainResult<()> {
        self.transition_to(OrderStatus::Processing)
    }

    /// `Processing -> Completed`.
    pub fn complete(&mut self) -> DomainResult<()> {
        self.transition_to(OrderStatus::Completed)
    }

    /// `Pending | Processing -> Cancelled`.
    pub fn cancel(&mut self) -> DomainResult<()> {
        self.transition_to(OrderStatus::Cancelled)
    }

    /// Apply a guarded status change, bumping `updated_at` on success.
    pub fn transition_to(&mut self, next: OrderStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "illegal status transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> Option<Self::Id> {
        self.id
    }

    fn validate(&self) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if self.shipping_address.trim().is_empty() {
            return Err(DomainError::validation("shipping address is required"));
        }
        self.items.iter().try_for_each(OrderItem::validate)
    }
}
