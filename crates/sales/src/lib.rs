//! Orders domain module.
//!
//! This crate contains business rules for customer orders, implemented purely as
//! deterministic domain logic (no IO, no queues, no storage).

pub mod order;

pub use order::{Order, OrderItem, OrderStatus};
