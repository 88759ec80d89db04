//! Postgres-backed order store implementation.
//!
//! Reads, status writes and whole-order rewrites; inserting new orders (and
//! reserving stock for them) belongs to the order-intake service that owns
//! the schema.
//!
//! ## Error Mapping
//!
//! | SQLx Error | OrderStoreError |
//! |------------|-----------------|
//! | Database (any code) | `Storage` |
//! | PoolClosed / PoolTimedOut | `Storage` |
//! | ColumnDecode / bad status label | `Decode` |
//! | Other | `Storage` |
//!
//! ## Conditional status writes
//!
//! `update_status_if` is a single `UPDATE ... WHERE id = $1 AND status = $2`,
//! so the row lock taken by Postgres serializes concurrent writers and at most
//! one of them observes `rows_affected = 1`.
//!
//! ## Whole-order writes
//!
//! `update` runs in one transaction: it locks the row (`FOR UPDATE`), checks
//! the status move against the persisted status, rewrites the header with the
//! recomputed total and replaces the `order_items` rows. The stored total and
//! the stored items never disagree.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use orderflow_core::{OrderId, ProductId, UserId};
use orderflow_sales::{Order, OrderItem, OrderStatus};

use super::r#trait::{OrderStore, OrderStoreError, check_status_change};

const ORDER_COLUMNS: &str = r#"
    id,
    user_id,
    total_amount_cents,
    status::text AS status,
    shipping_address,
    created_at,
    updated_at
"#;

/// DDL for the tables this adapter reads. Idempotent.
const SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE order_status AS ENUM ('PENDING', 'PROCESSING', 'COMPLETED', 'CANCELLED');
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS orders (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    total_amount_cents BIGINT NOT NULL DEFAULT 0,
    status order_status NOT NULL DEFAULT 'PENDING',
    shipping_address TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS orders_status_idx ON orders (status);

CREATE TABLE IF NOT EXISTS order_items (
    id BIGSERIAL PRIMARY KEY,
    order_id BIGINT NOT NULL REFERENCES orders (id) ON DELETE CASCADE,
    product_id BIGINT NOT NULL,
    product_name TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    unit_price_cents BIGINT NOT NULL
);
"#;

/// Postgres-backed order store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
/// Each call checks a connection out of the pool and returns it on completion.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    /// Create a new PostgresOrderStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `order_status` type and tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), OrderStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn load_items(
        &self,
        order_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<OrderItem>>, OrderStoreError> {
        let mut by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(by_order);
        }

        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        for row in rows {
            let item = OrderItemRow::from_row(&row)
                .map_err(|e| OrderStoreError::Decode(format!("order_items row: {e}")))?;
            let order_id = item.order_id;
            by_order.entry(order_id).or_default().push(item.try_into()?);
        }
        Ok(by_order)
    }

    async fn hydrate(&self, rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Order>, OrderStoreError> {
        let headers = rows
            .iter()
            .map(OrderRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OrderStoreError::Decode(format!("orders row: {e}")))?;

        let ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let mut items = self.load_items(&ids).await?;

        headers
            .into_iter()
            .map(|header| {
                let lines = items.remove(&header.id).unwrap_or_default();
                header.into_order(lines)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(status = %status, order_count = tracing::field::Empty), err)]
    async fn find_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1::order_status ORDER BY created_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_status", e))?;

        let orders = self.hydrate(rows).await?;
        Span::current().record("order_count", orders.len());
        Ok(orders)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_user", e))?;

        self.hydrate(rows).await
    }

    #[instrument(skip(self, order), fields(order_id = ?order.id_typed(), items = order.items().len()), err)]
    async fn update(&self, order: &Order) -> Result<bool, OrderStoreError> {
        let Some(id) = order.id_typed() else {
            return Ok(false);
        };
        let rows = ItemWrite::all(order)?;
        let total = i64::try_from(order.total_amount())
            .map_err(|_| OrderStoreError::Storage("total amount overflows BIGINT".to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        let persisted: Option<String> =
            sqlx::query_scalar("SELECT status::text FROM orders WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update", e))?;
        // Dropping `tx` rolls back.
        let Some(persisted) = persisted else {
            return Ok(false);
        };
        let persisted = persisted
            .parse::<OrderStatus>()
            .map_err(|e| OrderStoreError::Decode(e.to_string()))?;
        check_status_change(persisted, order.status())?;

        sqlx::query(
            r#"
            UPDATE orders
            SET user_id = $1,
                total_amount_cents = $2,
                status = $3::order_status,
                shipping_address = $4,
                updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(order.user_id().get())
        .bind(total)
        .bind(order.status().as_str())
        .bind(order.shipping_address())
        .bind(order.updated_at())
        .bind(id.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, product_name, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id.get())
            .bind(row.product_id)
            .bind(row.product_name)
            .bind(row.quantity)
            .bind(row.unit_price_cents)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("update", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(order_id = %id, from = %expected, to = %next), err)]
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

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3::order_status,
                updated_at = NOW()
            WHERE id = $1 AND status = $2::order_status
            "#,
        )
        .bind(id.get())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status_if", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count(&self) -> Result<u64, OrderStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM orders")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| OrderStoreError::Decode(format!("count: {e}")))?;
        Ok(total.max(0) as u64)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OrderStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            OrderStoreError::Storage(format!(
                "database error in {} ({}): {}",
                operation,
                code,
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            OrderStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            OrderStoreError::Storage(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            OrderStoreError::Decode(format!("column {} in {}: {}", index, operation, source))
        }
        _ => OrderStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[derive(Debug)]
struct OrderRow {
    id: i64,
    user_id: i64,
    status: String,
    shipping_address: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OrderRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            shipping_address: row.try_get("shipping_address")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl OrderRow {
    // total_amount_cents is derived from the items, so it is not read back.
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, OrderStoreError> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| OrderStoreError::Decode(e.to_string()))?;
        Ok(Order::rehydrate(
            OrderId::new(self.id),
            UserId::new(self.user_id),
            self.shipping_address,
            status,
            items,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[derive(Debug)]
struct OrderItemRow {
    order_id: i64,
    product_id: i64,
    product_name: String,
    quantity: i64,
    unit_price_cents: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OrderItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderItemRow {
            order_id: row.try_get("order_id")?,
            product_id: row.try_get("product_id")?,
            product_name: row.try_get("product_name")?,
            quantity: row.try_get("quantity")?,
            unit_price_cents: row.try_get("unit_price_cents")?,
        })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = OrderStoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let unit_price = u64::try_from(row.unit_price_cents).map_err(|_| {
            OrderStoreError::Decode(format!(
                "negative unit price {} on order {}",
                row.unit_price_cents, row.order_id
            ))
        })?;
        Ok(OrderItem::new(
            ProductId::new(row.product_id),
            row.product_name,
            row.quantity,
            unit_price,
        ))
    }
}

/// Bind values for one `order_items` row.
#[derive(Debug, PartialEq, Eq)]
struct ItemWrite<'a> {
    product_id: i64,
    product_name: &'a str,
    quantity: i64,
    unit_price_cents: i64,
}

impl<'a> ItemWrite<'a> {
    fn all(order: &'a Order) -> Result<Vec<Self>, OrderStoreError> {
        order
            .items()
            .iter()
            .map(|item| {
                let unit_price_cents = i64::try_from(item.unit_price).map_err(|_| {
                    OrderStoreError::Storage(format!(
                        "unit price {} of product {} overflows BIGINT",
                        item.unit_price, item.product_id
                    ))
                })?;
                Ok(ItemWrite {
                    product_id: item.product_id.get(),
                    product_name: &item.product_name,
                    quantity: item.quantity,
                    unit_price_cents,
                })
            })
            .collect()
    }
}
