//! In-memory implementation of every store trait.
//!
//! Used by the test suites and by `returns-server` when no database URL is
//! configured. It enforces the same uniqueness and reference rules as the
//! `PostgreSQL` schema.
//!
//! A [`ReturnTx`] holds the return-table lock for its whole lifetime and works
//! on a private copy, so transactions are serialized and a dropped transaction
//! leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use returns_core::{
    OrderId, OrderItemId, ReturnItemId, ReturnNumber, ReturnReasonId, ReturnRequestId,
    ReturnStatus, StatusHistoryId,
};

use super::{OrderSource, ReasonCatalog, RepositoryError, ReturnStore, ReturnTx, SettingsStore};
use crate::models::{
    NewReturnItem, NewReturnRequest, NewStatusHistoryEvent, Order, OrderItem, ReasonInput,
    ReturnFilter, ReturnItem, ReturnReason, ReturnRequest, ReturnSettings, StatusHistoryEvent,
    StatusPatch,
};

/// Orders, reasons and settings.
#[derive(Debug, Default)]
struct Catalog {
    orders: HashMap<OrderId, Order>,
    order_items: Vec<OrderItem>,
    reasons: BTreeMap<ReturnReasonId, ReturnReason>,
    next_reason_id: i32,
    settings: Option<ReturnSettings>,
}

/// Returns, items and the ledger.
#[derive(Debug, Clone, Default)]
struct ReturnTables {
    returns: BTreeMap<ReturnRequestId, ReturnRequest>,
    items: Vec<ReturnItem>,
    history: Vec<StatusHistoryEvent>,
    next_return_id: i32,
    next_item_id: i32,
    next_history_id: i32,
}

impl ReturnTables {
    fn newest_first(&self, keep: impl Fn(&ReturnRequest) -> bool) -> Vec<ReturnRequest> {
        let mut rows: Vec<ReturnRequest> =
            self.returns.values().filter(|r| keep(r)).cloned().collect();
        rows.sort_by(|a, b| {
            b.requested_at
                .cmp(&a.requested_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        rows
    }
}

/// Process-local store implementing [`ReturnStore`], [`ReasonCatalog`],
/// [`SettingsStore`] and [`OrderSource`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    catalog: Arc<Mutex<Catalog>>,
    tables: Arc<Mutex<ReturnTables>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an order and its lines.
    pub async fn insert_order(&self, order: Order, items: Vec<OrderItem>) {
        let mut catalog = self.catalog.lock().await;
        catalog.order_items.retain(|item| item.order_id != order.id);
        catalog.order_items.extend(items);
        catalog.orders.insert(order.id, order);
    }
}

// =============================================================================
// Returns
// =============================================================================

#[async_trait]
impl ReturnStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn ReturnTx>, RepositoryError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn get_return(
        &self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError> {
        Ok(self.tables.lock().await.returns.get(&id).cloned())
    }

    async fn list_items(&self, id: ReturnRequestId) -> Result<Vec<ReturnItem>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .iter()
            .filter(|item| item.return_request_id == id)
            .cloned()
            .collect())
    }

    async fn list_returns(
        &self,
        filter: &ReturnFilter,
    ) -> Result<Vec<ReturnRequest>, RepositoryError> {
        let tables = self.tables.lock().await;
        let offset = usize::try_from(filter.effective_offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(usize::MAX);
        Ok(tables
            .newest_first(|r| filter.matches(r))
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReturnRequest>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.newest_first(|r| r.order_id == order_id))
    }

    fn history(
        &self,
        id: ReturnRequestId,
    ) -> BoxStream<'_, Result<StatusHistoryEvent, RepositoryError>> {
        let tables = Arc::clone(&self.tables);
        stream::once(async move {
            let tables = tables.lock().await;
            let mut rows: Vec<StatusHistoryEvent> = tables
                .history
                .iter()
                .filter(|event| event.return_request_id == id)
                .cloned()
                .collect();
            rows.sort_by_key(|event| (event.created_at, event.id));
            rows
        })
        .flat_map(|rows| stream::iter(rows.into_iter().map(Ok)))
        .boxed()
    }

    async fn update_merchant_notes(
        &self,
        id: ReturnRequestId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReturnRequest, RepositoryError> {
        let mut tables = self.tables.lock().await;
        let request = tables
            .returns
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        request.merchant_notes = notes.map(str::to_string);
        request.updated_at = now;
        Ok(request.clone())
    }
}

/// Unit of work over [`ReturnTables`].
struct MemoryTx {
    guard: OwnedMutexGuard<ReturnTables>,
    work: ReturnTables,
}

#[async_trait]
impl ReturnTx for MemoryTx {
    async fn lock_order(&mut self, _order_id: OrderId) -> Result<(), RepositoryError> {
        // The table guard already serializes every transaction.
        Ok(())
    }

    async fn claimed_quantities(
        &mut self,
        order_id: OrderId,
    ) -> Result<HashMap<OrderItemId, i64>, RepositoryError> {
        let mut claimed = HashMap::new();
        for item in &self.work.items {
            let counts = self
                .work
                .returns
                .get(&item.return_request_id)
                .is_some_and(|r| r.order_id == order_id && r.status.claims_quantity());
            if counts {
                *claimed.entry(item.order_item_id).or_insert(0) +=
                    i64::from(item.quantity_returned);
            }
        }
        Ok(claimed)
    }

    async fn return_number_exists(
        &mut self,
        number: &ReturnNumber,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .work
            .returns
            .values()
            .any(|r| &r.return_number == number))
    }

    async fn insert_return(
        &mut self,
        new: &NewReturnRequest,
    ) -> Result<ReturnRequest, RepositoryError> {
        if self.return_number_exists(&new.return_number).await? {
            return Err(RepositoryError::Conflict(format!(
                "return number {} already issued",
                new.return_number
            )));
        }

        self.work.next_return_id += 1;
        let request = ReturnRequest {
            id: ReturnRequestId::new(self.work.next_return_id),
            return_number: new.return_number.clone(),
            order_id: new.order_id,
            customer_name: new.customer_name.clone(),
            customer_phone: new.customer_phone.clone(),
            resolution_type: new.resolution_type,
            reason_id: new.reason_id,
            reason_notes: new.reason_notes.clone(),
            status: ReturnStatus::Requested,
            total_refund_amount: new.settlement.total_refund_amount,
            return_shipping_cost: new.settlement.return_shipping_cost,
            shipping_paid_by: new.settlement.shipping_paid_by,
            net_refund_amount: new.settlement.net_refund_amount,
            rejection_reason: None,
            merchant_notes: None,
            pickup_tracking_number: None,
            photo_urls: new.photo_urls.clone(),
            version: 1,
            requested_at: new.requested_at,
            approved_at: None,
            item_received_at: None,
            completed_at: None,
            updated_at: new.requested_at,
        };
        self.work.returns.insert(request.id, request.clone());
        Ok(request)
    }

    async fn insert_items(
        &mut self,
        id: ReturnRequestId,
        items: &[NewReturnItem],
    ) -> Result<Vec<ReturnItem>, RepositoryError> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let duplicate = self
                .work
                .items
                .iter()
                .any(|i| i.return_request_id == id && i.order_item_id == item.order_item_id);
            if duplicate {
                return Err(RepositoryError::Conflict(format!(
                    "order item {} listed twice",
                    item.order_item_id
                )));
            }

            self.work.next_item_id += 1;
            let row = ReturnItem {
                id: ReturnItemId::new(self.work.next_item_id),
                return_request_id: id,
                order_item_id: item.order_item_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                product_name: item.product_name.clone(),
                variant_label: item.variant_label.clone(),
                quantity_ordered: item.quantity_ordered,
                quantity_returned: item.quantity_returned,
                unit_price: item.unit_price,
                item_total: item.item_total(),
            };
            self.work.items.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn fetch_return(
        &mut self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError> {
        Ok(self.work.returns.get(&id).cloned())
    }

    async fn update_status(
        &mut self,
        id: ReturnRequestId,
        expected_version: i32,
        patch: &StatusPatch,
    ) -> Result<ReturnRequest, RepositoryError> {
        let request = self
            .work
            .returns
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        if request.version != expected_version {
            return Err(RepositoryError::VersionMismatch {
                expected: expected_version,
            });
        }
        patch.apply_to(request);
        Ok(request.clone())
    }

    async fn append_history(
        &mut self,
        event: &NewStatusHistoryEvent,
    ) -> Result<StatusHistoryEvent, RepositoryError> {
        self.work.next_history_id += 1;
        let row = StatusHistoryEvent {
            id: StatusHistoryId::new(self.work.next_history_id),
            return_request_id: event.return_request_id,
            from_status: event.from_status,
            to_status: event.to_status,
            change_reason: event.change_reason.clone(),
            created_at: event.created_at,
        };
        self.work.history.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let Self { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

// =============================================================================
// Reasons, settings, orders
// =============================================================================

#[async_trait]
impl ReasonCatalog for InMemoryStore {
    async fn list_reasons(&self, active_only: bool) -> Result<Vec<ReturnReason>, RepositoryError> {
        let catalog = self.catalog.lock().await;
        let mut reasons: Vec<ReturnReason> = catalog
            .reasons
            .values()
            .filter(|r| r.is_active || !active_only)
            .cloned()
            .collect();
        reasons.sort_by_key(|r| (r.position, r.id));
        Ok(reasons)
    }

    async fn get_reason(
        &self,
        id: ReturnReasonId,
    ) -> Result<Option<ReturnReason>, RepositoryError> {
        Ok(self.catalog.lock().await.reasons.get(&id).cloned())
    }

    async fn create_reason(
        &self,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let mut catalog = self.catalog.lock().await;
        catalog.next_reason_id += 1;
        let reason = ReturnReason {
            id: ReturnReasonId::new(catalog.next_reason_id),
            label: input.label.trim().to_string(),
            fault_type: input.fault_type,
            requires_photos: input.requires_photos,
            is_active: input.is_active,
            position: input.position,
            created_at: now,
            updated_at: now,
        };
        catalog.reasons.insert(reason.id, reason.clone());
        Ok(reason)
    }

    async fn update_reason(
        &self,
        id: ReturnReasonId,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let mut catalog = self.catalog.lock().await;
        let reason = catalog
            .reasons
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        reason.label = input.label.trim().to_string();
        reason.fault_type = input.fault_type;
        reason.requires_photos = input.requires_photos;
        reason.is_active = input.is_active;
        reason.position = input.position;
        reason.updated_at = now;
        Ok(reason.clone())
    }

    async fn set_reason_active(
        &self,
        id: ReturnReasonId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let mut catalog = self.catalog.lock().await;
        let reason = catalog
            .reasons
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        reason.is_active = active;
        reason.updated_at = now;
        Ok(reason.clone())
    }

    async fn delete_reason(&self, id: ReturnReasonId) -> Result<(), RepositoryError> {
        // Same lock order as a transaction that reads reasons: tables first.
        let tables = self.tables.lock().await;
        let mut catalog = self.catalog.lock().await;
        if !catalog.reasons.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        if tables.returns.values().any(|r| r.reason_id == id) {
            return Err(RepositoryError::Conflict(format!(
                "reason {id} is referenced by returns"
            )));
        }
        catalog.reasons.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn load(&self) -> Result<ReturnSettings, RepositoryError> {
        Ok(self
            .catalog
            .lock()
            .await
            .settings
            .clone()
            .unwrap_or_default())
    }

    async fn save(&self, settings: &ReturnSettings) -> Result<ReturnSettings, RepositoryError> {
        self.catalog.lock().await.settings = Some(settings.clone());
        Ok(settings.clone())
    }
}

#[async_trait]
impl OrderSource for InMemoryStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.catalog.lock().await.orders.get(&id).cloned())
    }

    async fn list_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let catalog = self.catalog.lock().await;
        Ok(catalog
            .order_items
            .iter()
            .filter(|item| item.order_id == id)
            .cloned()
            .collect())
    }
}
