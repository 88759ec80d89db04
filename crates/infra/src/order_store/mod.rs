//! Order persistence boundary.
//!
//! The pipeline depends only on the `OrderStore` trait; the in-memory store
//! backs tests and local runs, the Postgres store backs deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use r#trait::{OrderStore, OrderStoreError};
