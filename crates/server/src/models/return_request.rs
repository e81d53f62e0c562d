//! Return request aggregate, its items and its status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use returns_core::{
    LedgerEntry, Money, OrderId, OrderItemId, ProductId, ResolutionType, ReturnItemId,
    ReturnNumber, ReturnReasonId, ReturnRequestId, ReturnStatus, Settlement, ShippingPayer,
    StatusHistoryId, VariantId,
};

/// A return case against one delivered order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    /// Unique ID.
    pub id: ReturnRequestId,
    /// Human-readable reference.
    pub return_number: ReturnNumber,
    /// Order being returned against.
    pub order_id: OrderId,
    /// Customer name snapshot.
    pub customer_name: String,
    /// Customer phone snapshot.
    pub customer_phone: Option<String>,
    /// Requested remedy.
    pub resolution_type: ResolutionType,
    /// Reason picked by the requester.
    pub reason_id: ReturnReasonId,
    /// Free text from the requester.
    pub reason_notes: Option<String>,
    /// Current lifecycle state.
    pub status: ReturnStatus,
    /// Sum of item totals.
    pub total_refund_amount: Money,
    /// Cost of the return shipment.
    pub return_shipping_cost: Money,
    /// Who pays for the return shipment.
    pub shipping_paid_by: ShippingPayer,
    /// Amount owed to the customer.
    pub net_refund_amount: Money,
    /// Set only when rejected.
    pub rejection_reason: Option<String>,
    /// Internal merchant notes.
    pub merchant_notes: Option<String>,
    /// Carrier reference for the return shipment.
    pub pickup_tracking_number: Option<String>,
    /// Evidence photo references.
    pub photo_urls: Vec<String>,
    /// Optimistic concurrency counter, bumped on every status change.
    pub version: i32,
    /// When the return was requested.
    pub requested_at: DateTime<Utc>,
    /// First approval.
    pub approved_at: Option<DateTime<Utc>>,
    /// Arrival at `received`.
    pub item_received_at: Option<DateTime<Utc>>,
    /// Arrival at `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Last modification of any field.
    pub updated_at: DateTime<Utc>,
}

impl ReturnRequest {
    /// The stored financial outcome.
    #[must_use]
    pub const fn settlement(&self) -> Settlement {
        Settlement {
            total_refund_amount: self.total_refund_amount,
            return_shipping_cost: self.return_shipping_cost,
            shipping_paid_by: self.shipping_paid_by,
            net_refund_amount: self.net_refund_amount,
        }
    }
}

/// One order line being returned. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    /// Unique ID.
    pub id: ReturnItemId,
    /// Owning return.
    pub return_request_id: ReturnRequestId,
    /// Source order line.
    pub order_item_id: OrderItemId,
    /// Product snapshot.
    pub product_id: ProductId,
    /// Variant snapshot.
    pub variant_id: Option<VariantId>,
    /// Product name snapshot.
    pub product_name: String,
    /// Variant label snapshot.
    pub variant_label: Option<String>,
    /// Units on the order line.
    pub quantity_ordered: i32,
    /// Units being returned.
    pub quantity_returned: i32,
    /// Unit price snapshot.
    pub unit_price: Money,
    /// `unit_price × quantity_returned`.
    pub item_total: Money,
}

/// One row of the append-only status ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEvent {
    /// Unique ID; breaks `created_at` ties.
    pub id: StatusHistoryId,
    /// Return this row belongs to.
    pub return_request_id: ReturnRequestId,
    /// `None` for the seed row.
    pub from_status: Option<ReturnStatus>,
    /// Status entered.
    pub to_status: ReturnStatus,
    /// Actor notes or reason.
    pub change_reason: Option<String>,
    /// When the transition happened.
    pub created_at: DateTime<Utc>,
}

impl From<&StatusHistoryEvent> for LedgerEntry {
    fn from(event: &StatusHistoryEvent) -> Self {
        Self {
            from_status: event.from_status,
            to_status: event.to_status,
        }
    }
}

/// A return with everything attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct ReturnDetail {
    /// The aggregate.
    #[serde(flatten)]
    pub request: ReturnRequest,
    /// Returned lines.
    pub items: Vec<ReturnItem>,
    /// Status ledger, oldest first.
    pub history: Vec<StatusHistoryEvent>,
}

// =============================================================================
// Inputs
// =============================================================================

/// Input for creating a return.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReturnInput {
    /// Order to return against.
    pub order_id: OrderId,
    /// Selected reason.
    pub reason_id: ReturnReasonId,
    /// Requested remedy.
    pub resolution_type: ResolutionType,
    /// Lines and quantities.
    pub items: Vec<CreateReturnItemInput>,
    /// Free text from the requester.
    #[serde(default)]
    pub reason_notes: Option<String>,
    /// Overrides the configured default shipping cost.
    #[serde(default)]
    pub return_shipping_cost: Option<Money>,
    /// Evidence photo references, uploaded elsewhere.
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

/// One line of a creation request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CreateReturnItemInput {
    /// Order line being returned.
    pub order_item_id: OrderItemId,
    /// Units being returned.
    pub quantity: i32,
}

/// Optional data accompanying a transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionInput {
    /// Actor notes, recorded on the ledger row.
    #[serde(default)]
    pub notes: Option<String>,
    /// Required when rejecting.
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Carrier reference, accepted on logistics transitions.
    #[serde(default)]
    pub tracking_number: Option<String>,
    /// Version the caller last saw; stale values are refused.
    #[serde(default)]
    pub expected_version: Option<i32>,
}

/// Filter for listing returns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReturnFilter {
    /// Only this status.
    #[serde(default)]
    pub status: Option<ReturnStatus>,
    /// Only this resolution.
    #[serde(default)]
    pub resolution_type: Option<ResolutionType>,
    /// Case-insensitive substring of return number, customer name or phone.
    #[serde(default)]
    pub search: Option<String>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Rows to skip.
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ReturnFilter {
    /// Default page size.
    pub const DEFAULT_LIMIT: i64 = 50;
    /// Largest accepted page size.
    pub const MAX_LIMIT: i64 = 200;

    /// Page size clamped to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// Offset clamped at zero.
    #[must_use]
    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Trimmed, non-empty search term.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether a return satisfies the filter (ignoring paging).
    #[must_use]
    pub fn matches(&self, request: &ReturnRequest) -> bool {
        if self.status.is_some_and(|s| s != request.status) {
            return false;
        }
        if self
            .resolution_type
            .is_some_and(|r| r != request.resolution_type)
        {
            return false;
        }
        self.search_term().is_none_or(|term| {
            let term = term.to_lowercase();
            request.return_number.as_str().to_lowercase().contains(&term)
                || request.customer_name.to_lowercase().contains(&term)
                || request
                    .customer_phone
                    .as_deref()
                    .is_some_and(|phone| phone.to_lowercase().contains(&term))
        })
    }
}

// =============================================================================
// Store writes
// =============================================================================

/// A fully validated return, ready to insert.
#[derive(Debug, Clone)]
pub struct NewReturnRequest {
    /// Generated reference.
    pub return_number: ReturnNumber,
    /// Order being returned against.
    pub order_id: OrderId,
    /// Customer name snapshot.
    pub customer_name: String,
    /// Customer phone snapshot.
    pub customer_phone: Option<String>,
    /// Requested remedy.
    pub resolution_type: ResolutionType,
    /// Selected reason.
    pub reason_id: ReturnReasonId,
    /// Requester notes.
    pub reason_notes: Option<String>,
    /// Computed amounts.
    pub settlement: Settlement,
    /// Evidence photo references.
    pub photo_urls: Vec<String>,
    /// Creation time.
    pub requested_at: DateTime<Utc>,
}

/// A validated return line, ready to insert.
#[derive(Debug, Clone)]
pub struct NewReturnItem {
    /// Source order line.
    pub order_item_id: OrderItemId,
    /// Product snapshot.
    pub product_id: ProductId,
    /// Variant snapshot.
    pub variant_id: Option<VariantId>,
    /// Product name snapshot.
    pub product_name: String,
    /// Variant label snapshot.
    pub variant_label: Option<String>,
    /// Units on the order line.
    pub quantity_ordered: i32,
    /// Units being returned.
    pub quantity_returned: i32,
    /// Unit price snapshot.
    pub unit_price: Money,
}

impl NewReturnItem {
    /// `unit_price × quantity_returned`.
    #[must_use]
    pub fn item_total(&self) -> Money {
        self.unit_price.times(self.quantity_returned)
    }
}

/// Field changes applied by a status transition.
///
/// Timestamps are write-once: stores only set them when currently null.
#[derive(Debug, Clone)]
pub struct StatusPatch {
    /// New status.
    pub status: ReturnStatus,
    /// Set `approved_at` if unset.
    pub approved_at: Option<DateTime<Utc>>,
    /// Set `item_received_at` if unset.
    pub item_received_at: Option<DateTime<Utc>>,
    /// Set `completed_at` if unset.
    pub completed_at: Option<DateTime<Utc>>,
    /// Replace the rejection reason.
    pub rejection_reason: Option<String>,
    /// Replace the tracking number.
    pub pickup_tracking_number: Option<String>,
    /// Modification time.
    pub updated_at: DateTime<Utc>,
}

impl StatusPatch {
    /// Build the patch for moving into `status` at `now`.
    #[must_use]
    pub fn entering(status: ReturnStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            approved_at: (status == ReturnStatus::Approved).then_some(now),
            item_received_at: (status == ReturnStatus::Received).then_some(now),
            completed_at: (status == ReturnStatus::Completed).then_some(now),
            rejection_reason: None,
            pickup_tracking_number: None,
            updated_at: now,
        }
    }

    /// Apply the patch to an in-memory copy, honouring write-once timestamps.
    pub fn apply_to(&self, request: &mut ReturnRequest) {
        request.status = self.status;
        request.approved_at = request.approved_at.or(self.approved_at);
        request.item_received_at = request.item_received_at.or(self.item_received_at);
        request.completed_at = request.completed_at.or(self.completed_at);
        if let Some(reason) = &self.rejection_reason {
            request.rejection_reason = Some(reason.clone());
        }
        if let Some(tracking) = &self.pickup_tracking_number {
            request.pickup_tracking_number = Some(tracking.clone());
        }
        request.version += 1;
        request.updated_at = self.updated_at;
    }
}

/// A ledger row to append.
#[derive(Debug, Clone)]
pub struct NewStatusHistoryEvent {
    /// Return the row belongs to.
    pub return_request_id: ReturnRequestId,
    /// `None` for the seed row.
    pub from_status: Option<ReturnStatus>,
    /// Status entered.
    pub to_status: ReturnStatus,
    /// Actor notes or reason.
    pub change_reason: Option<String>,
    /// Transition time.
    pub created_at: DateTime<Utc>,
}
