//! Database operations for return requests, items and the status ledger.
//!
//! Queries are built at runtime (`query_as` + `bind`) so the crate compiles
//! without a live database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::instrument;

use returns_core::{
    Money, OrderId, OrderItemId, ProductId, ResolutionType, ReturnItemId, ReturnNumber,
    ReturnReasonId, ReturnRequestId, ReturnStatus, ShippingPayer, StatusHistoryId, VariantId,
};

use super::{RepositoryError, ReturnStore, ReturnTx};
use crate::models::{
    NewReturnItem, NewReturnRequest, NewStatusHistoryEvent, ReturnFilter, ReturnItem,
    ReturnRequest, StatusHistoryEvent, StatusPatch,
};

/// Advisory lock namespace for per-order creation locks.
const ORDER_LOCK_NAMESPACE: i32 = 7301;

const RETURN_COLUMNS: &str = "id, return_number, order_id, customer_name, customer_phone, \
     resolution_type, reason_id, reason_notes, status, total_refund_amount, \
     return_shipping_cost, shipping_paid_by, net_refund_amount, rejection_reason, \
     merchant_notes, pickup_tracking_number, photo_urls, version, requested_at, \
     approved_at, item_received_at, completed_at, updated_at";

const ITEM_COLUMNS: &str = "id, return_request_id, order_item_id, product_id, variant_id, \
     product_name, variant_label, quantity_ordered, quantity_returned, unit_price, item_total";

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for `PostgreSQL` return request queries.
#[derive(Debug, sqlx::FromRow)]
struct ReturnRequestRow {
    id: i32,
    return_number: String,
    order_id: i32,
    customer_name: String,
    customer_phone: Option<String>,
    resolution_type: ResolutionType,
    reason_id: i32,
    reason_notes: Option<String>,
    status: ReturnStatus,
    total_refund_amount: Decimal,
    return_shipping_cost: Decimal,
    shipping_paid_by: ShippingPayer,
    net_refund_amount: Decimal,
    rejection_reason: Option<String>,
    merchant_notes: Option<String>,
    pickup_tracking_number: Option<String>,
    photo_urls: Vec<String>,
    version: i32,
    requested_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    item_received_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReturnRequestRow> for ReturnRequest {
    type Error = RepositoryError;

    fn try_from(row: ReturnRequestRow) -> Result<Self, Self::Error> {
        let return_number = ReturnNumber::parse(&row.return_number).map_err(|e| {
            RepositoryError::DataCorruption(format!(
                "return {} has invalid number {}: {e}",
                row.id, row.return_number
            ))
        })?;

        Ok(Self {
            id: ReturnRequestId::new(row.id),
            return_number,
            order_id: OrderId::new(row.order_id),
            customer_name: row.customer_name,
            customer_phone: row.customer_phone,
            resolution_type: row.resolution_type,
            reason_id: ReturnReasonId::new(row.reason_id),
            reason_notes: row.reason_notes,
            status: row.status,
            total_refund_amount: Money::new(row.total_refund_amount),
            return_shipping_cost: Money::new(row.return_shipping_cost),
            shipping_paid_by: row.shipping_paid_by,
            net_refund_amount: Money::new(row.net_refund_amount),
            rejection_reason: row.rejection_reason,
            merchant_notes: row.merchant_notes,
            pickup_tracking_number: row.pickup_tracking_number,
            photo_urls: row.photo_urls,
            version: row.version,
            requested_at: row.requested_at,
            approved_at: row.approved_at,
            item_received_at: row.item_received_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// Internal row type for `PostgreSQL` return item queries.
#[derive(Debug, sqlx::FromRow)]
struct ReturnItemRow {
    id: i32,
    return_request_id: i32,
    order_item_id: i32,
    product_id: i32,
    variant_id: Option<i32>,
    product_name: String,
    variant_label: Option<String>,
    quantity_ordered: i32,
    quantity_returned: i32,
    unit_price: Decimal,
    item_total: Decimal,
}

impl From<ReturnItemRow> for ReturnItem {
    fn from(row: ReturnItemRow) -> Self {
        Self {
            id: ReturnItemId::new(row.id),
            return_request_id: ReturnRequestId::new(row.return_request_id),
            order_item_id: OrderItemId::new(row.order_item_id),
            product_id: ProductId::new(row.product_id),
            variant_id: row.variant_id.map(VariantId::new),
            product_name: row.product_name,
            variant_label: row.variant_label,
            quantity_ordered: row.quantity_ordered,
            quantity_returned: row.quantity_returned,
            unit_price: Money::new(row.unit_price),
            item_total: Money::new(row.item_total),
        }
    }
}

/// Internal row type for `PostgreSQL` status ledger queries.
#[derive(Debug, sqlx::FromRow)]
struct StatusHistoryRow {
    id: i32,
    return_request_id: i32,
    from_status: Option<ReturnStatus>,
    to_status: ReturnStatus,
    change_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<StatusHistoryRow> for StatusHistoryEvent {
    fn from(row: StatusHistoryRow) -> Self {
        Self {
            id: StatusHistoryId::new(row.id),
            return_request_id: ReturnRequestId::new(row.return_request_id),
            from_status: row.from_status,
            to_status: row.to_status,
            change_reason: row.change_reason,
            created_at: row.created_at,
        }
    }
}

/// Escape `LIKE` metacharacters in a user-supplied search term.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// Store
// =============================================================================

/// `PostgreSQL` implementation of [`ReturnStore`].
#[derive(Debug, Clone)]
pub struct PgReturnStore {
    pool: PgPool,
}

impl PgReturnStore {
    /// Create a new return store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReturnStore for PgReturnStore {
    async fn begin(&self) -> Result<Box<dyn ReturnTx>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgReturnTx { tx }))
    }

    #[instrument(skip(self))]
    async fn get_return(
        &self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError> {
        let sql = format!("SELECT {RETURN_COLUMNS} FROM returns.return_requests WHERE id = $1");
        let row = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn list_items(&self, id: ReturnRequestId) -> Result<Vec<ReturnItem>, RepositoryError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM returns.return_items \
             WHERE return_request_id = $1 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, ReturnItemRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn list_returns(
        &self,
        filter: &ReturnFilter,
    ) -> Result<Vec<ReturnRequest>, RepositoryError> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {RETURN_COLUMNS} FROM returns.return_requests WHERE TRUE"
        ));

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(resolution) = filter.resolution_type {
            query.push(" AND resolution_type = ").push_bind(resolution);
        }
        if let Some(term) = filter.search_term() {
            let pattern = format!("%{}%", escape_like(term));
            query
                .push(" AND (return_number ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR customer_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR customer_phone ILIKE ")
                .push_bind(pattern)
                .push(")");
        }

        query
            .push(" ORDER BY requested_at DESC, id DESC LIMIT ")
            .push_bind(filter.effective_limit())
            .push(" OFFSET ")
            .push_bind(filter.effective_offset());

        let rows = query
            .build_query_as::<ReturnRequestRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReturnRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {RETURN_COLUMNS} FROM returns.return_requests \
             WHERE order_id = $1 ORDER BY requested_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    fn history(
        &self,
        id: ReturnRequestId,
    ) -> BoxStream<'_, Result<StatusHistoryEvent, RepositoryError>> {
        sqlx::query_as::<_, StatusHistoryRow>(
            r"
            SELECT id, return_request_id, from_status, to_status, change_reason, created_at
            FROM returns.return_status_history
            WHERE return_request_id = $1
            ORDER BY created_at, id
            ",
        )
        .bind(id)
        .fetch(&self.pool)
        .map(|row| row.map(StatusHistoryEvent::from).map_err(RepositoryError::from))
        .boxed()
    }

    #[instrument(skip(self, notes))]
    async fn update_merchant_notes(
        &self,
        id: ReturnRequestId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReturnRequest, RepositoryError> {
        let sql = format!(
            "UPDATE returns.return_requests SET merchant_notes = $2, updated_at = $3 \
             WHERE id = $1 RETURNING {RETURN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(id)
            .bind(notes)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A `PostgreSQL` transaction over the return tables.
///
/// Dropping it without calling [`ReturnTx::commit`] rolls back.
pub struct PgReturnTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ReturnTx for PgReturnTx {
    async fn lock_order(&mut self, order_id: OrderId) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(ORDER_LOCK_NAMESPACE)
            .bind(order_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn claimed_quantities(
        &mut self,
        order_id: OrderId,
    ) -> Result<HashMap<OrderItemId, i64>, RepositoryError> {
        let rows = sqlx::query_as::<_, (i32, i64)>(
            r"
            SELECT ri.order_item_id, SUM(ri.quantity_returned)::BIGINT
            FROM returns.return_items ri
            JOIN returns.return_requests rr ON rr.id = ri.return_request_id
            WHERE rr.order_id = $1
              AND rr.status NOT IN ('rejected', 'cancelled')
            GROUP BY ri.order_item_id
            ",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(item, claimed)| (OrderItemId::new(item), claimed))
            .collect())
    }

    async fn return_number_exists(
        &mut self,
        number: &ReturnNumber,
    ) -> Result<bool, RepositoryError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM returns.return_requests WHERE return_number = $1)",
        )
        .bind(number)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_return(
        &mut self,
        new: &NewReturnRequest,
    ) -> Result<ReturnRequest, RepositoryError> {
        let sql = format!(
            r"
            INSERT INTO returns.return_requests (
                return_number, order_id, customer_name, customer_phone, resolution_type,
                reason_id, reason_notes, status, total_refund_amount, return_shipping_cost,
                shipping_paid_by, net_refund_amount, photo_urls, version, requested_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'requested', $8, $9, $10, $11, $12, 1, $13, $13)
            RETURNING {RETURN_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(&new.return_number)
            .bind(new.order_id)
            .bind(&new.customer_name)
            .bind(&new.customer_phone)
            .bind(new.resolution_type)
            .bind(new.reason_id)
            .bind(&new.reason_notes)
            .bind(new.settlement.total_refund_amount)
            .bind(new.settlement.return_shipping_cost)
            .bind(new.settlement.shipping_paid_by)
            .bind(new.settlement.net_refund_amount)
            .bind(&new.photo_urls)
            .bind(new.requested_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    RepositoryError::Conflict(format!(
                        "return number {} already issued",
                        new.return_number
                    ))
                }
                other => RepositoryError::Database(other),
            })?;

        row.try_into()
    }

    async fn insert_items(
        &mut self,
        id: ReturnRequestId,
        items: &[NewReturnItem],
    ) -> Result<Vec<ReturnItem>, RepositoryError> {
        let sql = format!(
            r"
            INSERT INTO returns.return_items (
                return_request_id, order_item_id, product_id, variant_id, product_name,
                variant_label, quantity_ordered, quantity_returned, unit_price, item_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ITEM_COLUMNS}
            "
        );

        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, ReturnItemRow>(&sql)
                .bind(id)
                .bind(item.order_item_id)
                .bind(item.product_id)
                .bind(item.variant_id)
                .bind(&item.product_name)
                .bind(&item.variant_label)
                .bind(item.quantity_ordered)
                .bind(item.quantity_returned)
                .bind(item.unit_price)
                .bind(item.item_total())
                .fetch_one(&mut *self.tx)
                .await?;
            inserted.push(row.into());
        }

        Ok(inserted)
    }

    async fn fetch_return(
        &mut self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError> {
        let sql = format!("SELECT {RETURN_COLUMNS} FROM returns.return_requests WHERE id = $1");
        let row = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(
        &mut self,
        id: ReturnRequestId,
        expected_version: i32,
        patch: &StatusPatch,
    ) -> Result<ReturnRequest, RepositoryError> {
        let sql = format!(
            r"
            UPDATE returns.return_requests
            SET status = $3,
                approved_at = COALESCE(approved_at, $4),
                item_received_at = COALESCE(item_received_at, $5),
                completed_at = COALESCE(completed_at, $6),
                rejection_reason = COALESCE($7, rejection_reason),
                pickup_tracking_number = COALESCE($8, pickup_tracking_number),
                version = version + 1,
                updated_at = $9
            WHERE id = $1 AND version = $2
            RETURNING {RETURN_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, ReturnRequestRow>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(patch.status)
            .bind(patch.approved_at)
            .bind(patch.item_received_at)
            .bind(patch.completed_at)
            .bind(&patch.rejection_reason)
            .bind(&patch.pickup_tracking_number)
            .bind(patch.updated_at)
            .fetch_optional(&mut *self.tx)
            .await?;

        if let Some(row) = row {
            return row.try_into();
        }
        if self.fetch_return(id).await?.is_some() {
            Err(RepositoryError::VersionMismatch {
                expected: expected_version,
            })
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn append_history(
        &mut self,
        event: &NewStatusHistoryEvent,
    ) -> Result<StatusHistoryEvent, RepositoryError> {
        let row = sqlx::query_as::<_, StatusHistoryRow>(
            r"
            INSERT INTO returns.return_status_history
                (return_request_id, from_status, to_status, change_reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, return_request_id, from_status, to_status, change_reason, created_at
            ",
        )
        .bind(event.return_request_id)
        .bind(event.from_status)
        .bind(event.to_status)
        .bind(&event.change_reason)
        .bind(event.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}
