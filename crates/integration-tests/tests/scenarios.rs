//! End-to-end return scenarios against the in-memory store.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use returns_core::{
    FaultType, Money, OrderId, OrderItemId, ResolutionType, ReturnReasonId, ReturnStatus,
    ShippingPayer,
};
use returns_integration_tests::TestContext;
use returns_server::models::{CreateReturnInput, CreateReturnItemInput, TransitionInput};
use returns_server::services::ReturnError;

/// $1000.00 per unit, 3 units ordered.
const LINE: (i32, i32, i64) = (11, 3, 100_000);

fn two_units(order_id: OrderId, reason_id: ReturnReasonId) -> CreateReturnInput {
    CreateReturnInput {
        order_id,
        reason_id,
        resolution_type: ResolutionType::Refund,
        items: vec![CreateReturnItemInput {
            order_item_id: OrderItemId::new(11),
            quantity: 2,
        }],
        reason_notes: None,
        return_shipping_cost: Some(Money::from_cents(5_000)),
        photo_urls: Vec::new(),
    }
}

// =============================================================================
// Settlement
// =============================================================================

#[tokio::test]
async fn test_customer_fault_deducts_shipping() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[LINE]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let detail = ctx.engine.create(two_units(order, reason)).await.unwrap();

    assert_eq!(detail.request.status, ReturnStatus::Requested);
    assert_eq!(detail.request.total_refund_amount, Money::from_cents(200_000));
    assert_eq!(detail.request.shipping_paid_by, ShippingPayer::Customer);
    assert_eq!(detail.request.net_refund_amount, Money::from_cents(195_000));
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].quantity_returned, 2);
    assert_eq!(detail.items[0].item_total, Money::from_cents(200_000));
}

#[tokio::test]
async fn test_merchant_fault_refunds_in_full() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[LINE]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;

    let detail = ctx.engine.create(two_units(order, reason)).await.unwrap();

    assert_eq!(detail.request.shipping_paid_by, ShippingPayer::Merchant);
    assert_eq!(detail.request.return_shipping_cost, Money::from_cents(5_000));
    assert_eq!(detail.request.net_refund_amount, Money::from_cents(200_000));
}

// =============================================================================
// Transitions
// =============================================================================

#[tokio::test]
async fn test_reject_without_reason_leaves_request_untouched() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[LINE]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;
    let created = ctx.engine.create(two_units(order, reason)).await.unwrap();
    let id = created.request.id;

    let err = ctx
        .engine
        .reject(
            id,
            TransitionInput {
                rejection_reason: Some("   ".to_string()),
                ..TransitionInput::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReturnError::MissingRejectionReason {
            current: ReturnStatus::Requested
        }
    ));
    let after = ctx.engine.get(id).await.unwrap();
    assert_eq!(after.request.status, ReturnStatus::Requested);
    assert_eq!(after.request.version, created.request.version);
    assert_eq!(after.history.len(), 1);
}

#[tokio::test]
async fn test_approve_receive_complete_writes_four_ledger_rows() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[LINE]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(two_units(order, reason))
        .await
        .unwrap()
        .request
        .id;

    let approved = ctx.engine.approve(id, TransitionInput::default()).await.unwrap();
    assert!(approved.approved_at.is_some());
    let received = ctx
        .engine
        .mark_received(id, TransitionInput::default())
        .await
        .unwrap();
    assert!(received.item_received_at.is_some());
    let completed = ctx.engine.complete(id, TransitionInput::default()).await.unwrap();
    let completed_at = completed.completed_at;
    assert!(completed_at.is_some());

    // Completing again is a no-op and keeps the first timestamp.
    let again = ctx.engine.complete(id, TransitionInput::default()).await.unwrap();
    assert_eq!(again.completed_at, completed_at);
    assert_eq!(again.version, completed.version);

    let detail = ctx.engine.get(id).await.unwrap();
    assert_eq!(detail.request.status, ReturnStatus::Completed);
    let edges: Vec<_> = detail
        .history
        .iter()
        .map(|e| (e.from_status, e.to_status))
        .collect();
    assert_eq!(
        edges,
        vec![
            (None, ReturnStatus::Requested),
            (Some(ReturnStatus::Requested), ReturnStatus::Approved),
            (Some(ReturnStatus::Approved), ReturnStatus::Received),
            (Some(ReturnStatus::Received), ReturnStatus::Completed),
        ]
    );
}

// =============================================================================
// Creation rules
// =============================================================================

#[tokio::test]
async fn test_requesting_more_than_ordered_is_refused() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[LINE]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;
    let mut input = two_units(order, reason);
    input.items[0].quantity = 4;

    let err = ctx.engine.create(input).await.unwrap_err();

    assert!(matches!(
        err,
        ReturnError::QuantityExceeded {
            ordered: 3,
            already_claimed: 0,
            requested: 4,
            ..
        }
    ));
    assert!(ctx.engine.list_for_order(order).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_window_expired_after_thirty_days() {
    let ctx = TestContext::new();
    ctx.settings(|s| s.return_window_days = 7).await;
    let order = ctx.delivered_order(1, 30, &[LINE]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let err = ctx.engine.create(two_units(order, reason)).await.unwrap_err();

    assert!(matches!(
        err,
        ReturnError::WindowExpired { window_days: 7, .. }
    ));
}
