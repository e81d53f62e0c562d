//! Read-only access to storefront orders.
//!
//! Reads `public.orders` and `public.order_items`, which are owned and
//! migrated by the storefront. Order status is stored as text there.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::instrument;

use returns_core::{Money, OrderId, OrderItemId, OrderStatus, ProductId, VariantId};

use super::{OrderSource, RepositoryError};
use crate::models::{Order, OrderItem};

/// Internal row type for storefront order queries.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    status: String,
    delivered_at: Option<DateTime<Utc>>,
    customer_name: String,
    customer_phone: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status: OrderStatus = row.status.parse().map_err(|e: String| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;

        Ok(Self {
            id: OrderId::new(row.id),
            status,
            delivered_at: row.delivered_at,
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
        })
    }
}

/// Internal row type for storefront order item queries.
#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: i32,
    order_id: i32,
    product_id: i32,
    variant_id: Option<i32>,
    product_name: String,
    variant_label: Option<String>,
    quantity: i32,
    unit_price: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: OrderItemId::new(row.id),
            order_id: OrderId::new(row.order_id),
            product_id: ProductId::new(row.product_id),
            variant_id: row.variant_id.map(VariantId::new),
            product_name: row.product_name,
            variant_label: row.variant_label,
            quantity: row.quantity,
            unit_price: Money::new(row.unit_price),
        }
    }
}

/// `PostgreSQL` implementation of [`OrderSource`].
#[derive(Debug, Clone)]
pub struct PgOrderSource {
    pool: PgPool,
}

impl PgOrderSource {
    /// Create a new order source.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderSource for PgOrderSource {
    #[instrument(skip(self))]
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, status, delivered_at, customer_name, customer_phone
            FROM public.orders
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn list_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT id, order_id, product_id, variant_id, product_name, variant_label,
                   quantity, unit_price
            FROM public.order_items
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
