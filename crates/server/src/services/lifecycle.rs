//! Return lifecycle engine.
//!
//! Validates return requests against the policy, the order and the quantities
//! already claimed, computes the settlement once, and moves returns through
//! the state table in [`ReturnStatus::allowed_targets`]. Every write happens in
//! one store transaction together with its ledger row; events go to the
//! outbox only after commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use returns_core::{
    Money, OrderId, OrderItemId, OrderStatus, ResolutionType, ReturnNumber, ReturnReasonId,
    ReturnRequestId, ReturnStatus, Settlement, SettlementLine,
};

use crate::db::{
    OrderSource, ReasonCatalog, RepositoryError, ReturnStore, ReturnTx, SettingsStore, Stores,
};
use crate::models::{
    CreateReturnInput, NewReturnItem, NewReturnRequest, NewStatusHistoryEvent, OrderItem,
    ReasonInput, ReturnDetail, ReturnFilter, ReturnReason, ReturnRequest, ReturnSettings,
    StatusHistoryEvent, StatusPatch, TransitionInput,
};
use crate::services::notifications::{EventOutbox, ReturnEvent};

/// Ledger note on the row written by automatic approval.
pub const AUTO_APPROVED_REASON: &str = "auto-approved";

/// Attempts at drawing an unused return number before giving up.
const MAX_NUMBER_ATTEMPTS: usize = 5;

/// Errors returned by the lifecycle engine.
#[derive(Debug, Error)]
pub enum ReturnError {
    /// The order cannot be returned in its current state.
    #[error("order {order_id} is {status}; only delivered orders can be returned")]
    InvalidOrderState {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The return window has closed.
    #[error("return window of {window_days} days after delivery ({delivered_at}) has expired")]
    WindowExpired {
        delivered_at: DateTime<Utc>,
        window_days: i32,
    },

    /// The policy does not offer this resolution.
    #[error("resolution {0} is not allowed")]
    ResolutionNotAllowed(ResolutionType),

    /// More units requested than remain returnable on an order line.
    #[error(
        "order item {order_item_id}: requested {requested}, ordered {ordered}, already claimed {already_claimed}"
    )]
    QuantityExceeded {
        order_item_id: OrderItemId,
        ordered: i32,
        already_claimed: i64,
        requested: i32,
    },

    /// Returns are switched off.
    #[error("returns are disabled")]
    ReturnsDisabled,

    /// Photo evidence is required but none was supplied.
    #[error("photos are required for this return")]
    PhotosRequired,

    /// More photos than the policy allows.
    #[error("at most {max} photos allowed, got {got}")]
    TooManyPhotos { max: i32, got: usize },

    /// Malformed request data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested edge is not in the state table.
    #[error("cannot move return from {from} to {to}")]
    IllegalTransition {
        from: ReturnStatus,
        to: ReturnStatus,
        allowed: Vec<ReturnStatus>,
    },

    /// Rejection needs a reason.
    #[error("a rejection reason is required to reject a {current} return")]
    MissingRejectionReason { current: ReturnStatus },

    /// The return changed since the caller read it.
    #[error("return {id} was modified concurrently; reload and retry")]
    ConcurrentModification { id: ReturnRequestId },

    /// Unknown entity.
    #[error("{0} not found")]
    NotFound(String),

    /// The reason is still referenced by returns.
    #[error("reason {id} is used by existing returns; disable it instead")]
    ReasonInUse { id: ReturnReasonId },

    /// Settings failed validation.
    #[error("invalid settings: {}", .0.join("; "))]
    InvalidSettings(Vec<String>),

    /// Store failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ReturnError {
    fn return_not_found(id: ReturnRequestId) -> Self {
        Self::NotFound(format!("return {id}"))
    }

    fn reason_not_found(id: ReturnReasonId) -> Self {
        Self::NotFound(format!("reason {id}"))
    }
}

/// Orchestrates every return operation.
#[derive(Clone)]
pub struct LifecycleEngine {
    returns: Arc<dyn ReturnStore>,
    reasons: Arc<dyn ReasonCatalog>,
    settings: Arc<dyn SettingsStore>,
    orders: Arc<dyn OrderSource>,
    outbox: EventOutbox,
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

impl LifecycleEngine {
    /// Create an engine over a set of stores.
    #[must_use]
    pub fn new(stores: Stores, outbox: EventOutbox) -> Self {
        Self {
            returns: stores.returns,
            reasons: stores.reasons,
            settings: stores.settings,
            orders: stores.orders,
            outbox,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Validate and record a new return.
    ///
    /// Request, items and the seed ledger row are written atomically, and
    /// creation is serialized per order so claimed quantities cannot race.
    /// With auto-approval on, the approval is applied in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure, or a store error.
    #[instrument(skip(self, input), fields(order_id = %input.order_id, items = input.items.len()))]
    pub async fn create(&self, input: CreateReturnInput) -> Result<ReturnDetail, ReturnError> {
        let settings = self.settings.load().await?;
        if !settings.returns_enabled {
            return Err(ReturnError::ReturnsDisabled);
        }
        if !settings.allows(input.resolution_type) {
            return Err(ReturnError::ResolutionNotAllowed(input.resolution_type));
        }

        let now = Utc::now();
        let order = self
            .orders
            .get_order(input.order_id)
            .await?
            .ok_or_else(|| ReturnError::NotFound(format!("order {}", input.order_id)))?;
        let delivered_at = match (order.status, order.delivered_at) {
            (OrderStatus::Delivered, Some(delivered_at)) => delivered_at,
            (status, _) => {
                return Err(ReturnError::InvalidOrderState {
                    order_id: order.id,
                    status,
                });
            }
        };
        check_window(delivered_at, settings.return_window_days, now)?;

        let reason = self
            .reasons
            .get_reason(input.reason_id)
            .await?
            .ok_or_else(|| ReturnError::reason_not_found(input.reason_id))?;
        if !reason.is_active {
            return Err(ReturnError::InvalidInput(format!(
                "reason {} is disabled",
                reason.id
            )));
        }

        let photo_urls = check_photos(&input.photo_urls, &reason, &settings)?;
        let shipping_cost = input
            .return_shipping_cost
            .unwrap_or(settings.default_return_shipping_cost);
        if !shipping_cost.is_storable() {
            return Err(ReturnError::InvalidInput(format!(
                "return_shipping_cost must be whole cents between 0 and {} (got {})",
                Money::MAX,
                shipping_cost.amount()
            )));
        }

        let order_items = self.orders.list_order_items(order.id).await?;
        let new_items = build_items(&input, &order_items)?;
        let settlement = Settlement::compute(
            new_items.iter().map(|item| SettlementLine {
                unit_price: item.unit_price,
                quantity: item.quantity_returned,
            }),
            shipping_cost,
            reason.fault_type,
        );
        if settlement.total_refund_amount > Money::MAX {
            return Err(ReturnError::InvalidInput(format!(
                "refund total {} exceeds {}",
                settlement.total_refund_amount,
                Money::MAX
            )));
        }

        let mut tx = self.returns.begin().await?;
        tx.lock_order(order.id).await?;
        let claimed = tx.claimed_quantities(order.id).await?;
        check_claims(&new_items, &claimed)?;

        let return_number = issue_return_number(&mut *tx, now).await?;
        let mut request = tx
            .insert_return(&NewReturnRequest {
                return_number,
                order_id: order.id,
                customer_name: order.customer_name.clone(),
                customer_phone: order.customer_phone.clone(),
                resolution_type: input.resolution_type,
                reason_id: reason.id,
                reason_notes: normalize(input.reason_notes),
                settlement,
                photo_urls,
                requested_at: now,
            })
            .await?;
        let items = tx.insert_items(request.id, &new_items).await?;

        let mut history = vec![
            tx.append_history(&NewStatusHistoryEvent {
                return_request_id: request.id,
                from_status: None,
                to_status: ReturnStatus::Requested,
                change_reason: request.reason_notes.clone(),
                created_at: now,
            })
            .await?,
        ];

        if settings.auto_approve_returns {
            let approved_at = ledger_time(now, now);
            let patch = StatusPatch::entering(ReturnStatus::Approved, approved_at);
            request = tx.update_status(request.id, request.version, &patch).await?;
            history.push(
                tx.append_history(&NewStatusHistoryEvent {
                    return_request_id: request.id,
                    from_status: Some(ReturnStatus::Requested),
                    to_status: ReturnStatus::Approved,
                    change_reason: Some(AUTO_APPROVED_REASON.to_string()),
                    created_at: approved_at,
                })
                .await?,
            );
        }

        tx.commit().await?;

        info!(
            return_id = %request.id,
            return_number = %request.return_number,
            status = %request.status,
            net_refund = %request.net_refund_amount,
            "Return created"
        );

        self.outbox.publish(ReturnEvent::ReturnCreated {
            return_id: request.id,
            return_number: request.return_number.clone(),
            order_id: request.order_id,
            status: request.status,
            resolution_type: request.resolution_type,
            net_refund_amount: request.net_refund_amount,
            at: now,
        });
        if request.status == ReturnStatus::Approved {
            self.publish_change(&request, ReturnStatus::Requested, history.last());
        }

        Ok(ReturnDetail {
            request,
            items,
            history,
        })
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Move a return to `target`.
    ///
    /// Asking for the status the return already has succeeds without writing
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `IllegalTransition`, `MissingRejectionReason`,
    /// `ReturnsDisabled` (approval only), `ConcurrentModification`, or a
    /// store error.
    #[instrument(skip(self, input), fields(return_id = %id, target = %target))]
    pub async fn transition(
        &self,
        id: ReturnRequestId,
        target: ReturnStatus,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        let mut tx = self.returns.begin().await?;
        let current = tx
            .fetch_return(id)
            .await?
            .ok_or_else(|| ReturnError::return_not_found(id))?;

        if current.status == target {
            debug!("Return already in target status");
            return Ok(current);
        }
        if input.expected_version.is_some_and(|v| v != current.version) {
            return Err(ReturnError::ConcurrentModification { id });
        }
        if !current.status.can_transition_to(target) {
            return Err(ReturnError::IllegalTransition {
                from: current.status,
                to: target,
                allowed: current.status.allowed_targets().to_vec(),
            });
        }
        if target == ReturnStatus::Approved && !self.settings.load().await?.returns_enabled {
            return Err(ReturnError::ReturnsDisabled);
        }

        let now = ledger_time(current.updated_at, Utc::now());
        let notes = normalize(input.notes);
        let mut patch = StatusPatch::entering(target, now);
        let change_reason = if target == ReturnStatus::Rejected {
            let reason = normalize(input.rejection_reason).ok_or(
                ReturnError::MissingRejectionReason {
                    current: current.status,
                },
            )?;
            patch.rejection_reason = Some(reason.clone());
            Some(reason)
        } else {
            notes
        };
        if accepts_tracking(target) {
            patch.pickup_tracking_number = normalize(input.tracking_number);
        }

        let updated = tx
            .update_status(id, current.version, &patch)
            .await
            .map_err(|e| match e {
                RepositoryError::VersionMismatch { .. } => {
                    ReturnError::ConcurrentModification { id }
                }
                other => ReturnError::Repository(other),
            })?;
        let event = tx
            .append_history(&NewStatusHistoryEvent {
                return_request_id: id,
                from_status: Some(current.status),
                to_status: target,
                change_reason,
                created_at: now,
            })
            .await?;
        tx.commit().await?;

        info!(
            return_number = %updated.return_number,
            from = %current.status,
            to = %target,
            "Return status changed"
        );
        self.publish_change(&updated, current.status, Some(&event));

        Ok(updated)
    }

    /// `requested|disputed → approved`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn approve(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Approved, input).await
    }

    /// `requested → rejected`; needs `input.rejection_reason`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn reject(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Rejected, input).await
    }

    /// `approved → pickup_scheduled`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn schedule_pickup(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::PickupScheduled, input)
            .await
    }

    /// Goods handed to the carrier.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn mark_in_transit(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::InTransit, input).await
    }

    /// Goods arrived at the warehouse.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn mark_received(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Received, input).await
    }

    /// Goods checked.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn mark_inspected(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Inspected, input).await
    }

    /// Settle the return.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn complete(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Completed, input).await
    }

    /// Abandon the return.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn cancel(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Cancelled, input).await
    }

    /// Flag the return for dispute resolution.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn dispute(
        &self,
        id: ReturnRequestId,
        input: TransitionInput,
    ) -> Result<ReturnRequest, ReturnError> {
        self.transition(id, ReturnStatus::Disputed, input).await
    }

    /// Replace merchant notes. Allowed in every status; writes no ledger row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store error.
    #[instrument(skip(self, notes), fields(return_id = %id))]
    pub async fn update_merchant_notes(
        &self,
        id: ReturnRequestId,
        notes: Option<String>,
    ) -> Result<ReturnRequest, ReturnError> {
        let notes = normalize(notes);
        self.returns
            .update_merchant_notes(id, notes.as_deref(), Utc::now())
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => ReturnError::return_not_found(id),
                other => ReturnError::Repository(other),
            })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A return with its items and ledger.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store error.
    #[instrument(skip(self))]
    pub async fn get(&self, id: ReturnRequestId) -> Result<ReturnDetail, ReturnError> {
        let request = self
            .returns
            .get_return(id)
            .await?
            .ok_or_else(|| ReturnError::return_not_found(id))?;
        let items = self.returns.list_items(id).await?;
        let history = self.returns.history(id).try_collect().await?;

        Ok(ReturnDetail {
            request,
            items,
            history,
        })
    }

    /// The ledger of one return, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store error.
    pub async fn history(
        &self,
        id: ReturnRequestId,
    ) -> Result<Vec<StatusHistoryEvent>, ReturnError> {
        if self.returns.get_return(id).await?.is_none() {
            return Err(ReturnError::return_not_found(id));
        }
        Ok(self.returns.history(id).try_collect().await?)
    }

    /// Returns matching a filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list(&self, filter: &ReturnFilter) -> Result<Vec<ReturnRequest>, ReturnError> {
        Ok(self.returns.list_returns(filter).await?)
    }

    /// All returns against one order, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReturnRequest>, ReturnError> {
        Ok(self.returns.list_for_order(order_id).await?)
    }

    // =========================================================================
    // Reason catalog
    // =========================================================================

    /// Reasons by display position, optionally only active ones.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_reasons(&self, active_only: bool) -> Result<Vec<ReturnReason>, ReturnError> {
        Ok(self.reasons.list_reasons(active_only).await?)
    }

    /// One reason.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store error.
    pub async fn get_reason(&self, id: ReturnReasonId) -> Result<ReturnReason, ReturnError> {
        self.reasons
            .get_reason(id)
            .await?
            .ok_or_else(|| ReturnError::reason_not_found(id))
    }

    /// Add a reason.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a blank label, or a store error.
    #[instrument(skip(self, input))]
    pub async fn create_reason(&self, input: &ReasonInput) -> Result<ReturnReason, ReturnError> {
        check_label(input)?;
        Ok(self.reasons.create_reason(input, Utc::now()).await?)
    }

    /// Replace a reason's fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `NotFound`, or a store error.
    #[instrument(skip(self, input))]
    pub async fn update_reason(
        &self,
        id: ReturnReasonId,
        input: &ReasonInput,
    ) -> Result<ReturnReason, ReturnError> {
        check_label(input)?;
        self.reasons
            .update_reason(id, input, Utc::now())
            .await
            .map_err(|e| reason_error(id, e))
    }

    /// Enable or soft-disable a reason.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a store error.
    #[instrument(skip(self))]
    pub async fn set_reason_active(
        &self,
        id: ReturnReasonId,
        active: bool,
    ) -> Result<ReturnReason, ReturnError> {
        self.reasons
            .set_reason_active(id, active, Utc::now())
            .await
            .map_err(|e| reason_error(id, e))
    }

    /// Hard-delete a reason no return references.
    ///
    /// # Errors
    ///
    /// Returns `ReasonInUse`, `NotFound`, or a store error.
    #[instrument(skip(self))]
    pub async fn delete_reason(&self, id: ReturnReasonId) -> Result<(), ReturnError> {
        self.reasons
            .delete_reason(id)
            .await
            .map_err(|e| reason_error(id, e))
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Current return policy.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn get_settings(&self) -> Result<ReturnSettings, ReturnError> {
        Ok(self.settings.load().await?)
    }

    /// Load the stored policy and check it, as done once at startup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if the stored row is out of range, or a
    /// store error.
    pub async fn verify_settings(&self) -> Result<ReturnSettings, ReturnError> {
        let settings = self.settings.load().await?;
        settings.validate().map_err(ReturnError::InvalidSettings)?;
        if !settings.any_resolution_allowed() {
            warn!("Every resolution type is disabled; no return can be created");
        }
        Ok(settings)
    }

    /// Validate and replace the return policy. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` listing every problem, or a store error.
    #[instrument(skip(self, settings))]
    pub async fn update_settings(
        &self,
        settings: &ReturnSettings,
    ) -> Result<ReturnSettings, ReturnError> {
        settings.validate().map_err(ReturnError::InvalidSettings)?;
        let saved = self.settings.save(settings).await?;
        info!(
            returns_enabled = saved.returns_enabled,
            window_days = saved.return_window_days,
            auto_approve = saved.auto_approve_returns,
            "Return settings updated"
        );
        Ok(saved)
    }

    fn publish_change(
        &self,
        request: &ReturnRequest,
        from: ReturnStatus,
        event: Option<&StatusHistoryEvent>,
    ) {
        self.outbox.publish(ReturnEvent::ReturnStatusChanged {
            return_id: request.id,
            return_number: request.return_number.clone(),
            order_id: request.order_id,
            from,
            to: request.status,
            resolution_type: request.resolution_type,
            change_reason: event.and_then(|e| e.change_reason.clone()),
            at: event.map_or(request.updated_at, |e| e.created_at),
        });
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

/// Trimmed, non-empty text.
fn normalize(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Statuses whose transition may carry a carrier tracking number.
const fn accepts_tracking(target: ReturnStatus) -> bool {
    matches!(
        target,
        ReturnStatus::PickupScheduled | ReturnStatus::InTransit | ReturnStatus::Received
    )
}

/// Timestamp for a new ledger row on a return last touched at `previous`.
///
/// Ledger rows are ordered by `created_at`, so a row never gets a time at or
/// before the return's last write, even if the clock stepped back.
fn ledger_time(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

fn check_window(
    delivered_at: DateTime<Utc>,
    window_days: i32,
    now: DateTime<Utc>,
) -> Result<(), ReturnError> {
    // A window too large to represent never closes.
    let closes_at = Duration::try_days(i64::from(window_days))
        .and_then(|window| delivered_at.checked_add_signed(window));
    if closes_at.is_some_and(|closes_at| now > closes_at) {
        return Err(ReturnError::WindowExpired {
            delivered_at,
            window_days,
        });
    }
    Ok(())
}

fn check_photos(
    photo_urls: &[String],
    reason: &ReturnReason,
    settings: &ReturnSettings,
) -> Result<Vec<String>, ReturnError> {
    let photos: Vec<String> = photo_urls
        .iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();

    if photos.is_empty() && (reason.requires_photos || settings.require_return_photos) {
        return Err(ReturnError::PhotosRequired);
    }
    let max = settings.max_photos_per_return;
    if usize::try_from(max).is_ok_and(|max| photos.len() > max) {
        return Err(ReturnError::TooManyPhotos {
            max,
            got: photos.len(),
        });
    }
    Ok(photos)
}

/// Resolve requested lines against the order, snapshotting name and price.
fn build_items(
    input: &CreateReturnInput,
    order_items: &[OrderItem],
) -> Result<Vec<NewReturnItem>, ReturnError> {
    if input.items.is_empty() {
        return Err(ReturnError::InvalidInput(
            "at least one item is required".to_string(),
        ));
    }

    let by_id: HashMap<OrderItemId, &OrderItem> =
        order_items.iter().map(|item| (item.id, item)).collect();
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(input.items.len());

    for line in &input.items {
        if !seen.insert(line.order_item_id) {
            return Err(ReturnError::InvalidInput(format!(
                "order item {} listed more than once",
                line.order_item_id
            )));
        }
        let ordered = by_id.get(&line.order_item_id).ok_or_else(|| {
            ReturnError::InvalidInput(format!(
                "order item {} is not part of order {}",
                line.order_item_id, input.order_id
            ))
        })?;
        if line.quantity < 1 {
            return Err(ReturnError::InvalidInput(format!(
                "quantity for order item {} must be at least 1",
                line.order_item_id
            )));
        }

        items.push(NewReturnItem {
            order_item_id: ordered.id,
            product_id: ordered.product_id,
            variant_id: ordered.variant_id,
            product_name: ordered.product_name.clone(),
            variant_label: ordered.variant_label.clone(),
            quantity_ordered: ordered.quantity,
            quantity_returned: line.quantity,
            unit_price: ordered.unit_price,
        });
    }

    Ok(items)
}

/// Cumulative claim across live returns must not exceed the ordered quantity.
fn check_claims(
    items: &[NewReturnItem],
    claimed: &HashMap<OrderItemId, i64>,
) -> Result<(), ReturnError> {
    for item in items {
        let already_claimed = claimed.get(&item.order_item_id).copied().unwrap_or(0);
        if already_claimed + i64::from(item.quantity_returned) > i64::from(item.quantity_ordered)
        {
            return Err(ReturnError::QuantityExceeded {
                order_item_id: item.order_item_id,
                ordered: item.quantity_ordered,
                already_claimed,
                requested: item.quantity_returned,
            });
        }
    }
    Ok(())
}

fn check_label(input: &ReasonInput) -> Result<(), ReturnError> {
    if input.normalized_label().is_none() {
        return Err(ReturnError::InvalidInput(
            "reason label must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn reason_error(id: ReturnReasonId, e: RepositoryError) -> ReturnError {
    match e {
        RepositoryError::NotFound => ReturnError::reason_not_found(id),
        RepositoryError::Conflict(_) => ReturnError::ReasonInUse { id },
        other => ReturnError::Repository(other),
    }
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..ReturnNumber::SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ReturnNumber::SUFFIX_ALPHABET.len());
            char::from(ReturnNumber::SUFFIX_ALPHABET[idx])
        })
        .collect()
}

/// Draw return numbers until one has never been issued.
async fn issue_return_number(
    tx: &mut dyn ReturnTx,
    now: DateTime<Utc>,
) -> Result<ReturnNumber, ReturnError> {
    for _ in 0..MAX_NUMBER_ATTEMPTS {
        let candidate = ReturnNumber::new(now.date_naive(), &random_suffix())
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;
        if !tx.return_number_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(RepositoryError::Conflict("could not allocate a unique return number".to_string()).into())
}
