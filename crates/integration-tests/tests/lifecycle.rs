//! Lifecycle engine invariants: claims, ledger replay, idempotence,
//! concurrency, policy checks and published events.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use returns_core::{
    FaultType, LedgerEntry, Money, OrderId, OrderItemId, OrderStatus, ResolutionType,
    ReturnReasonId, ReturnStatus, replay,
};
use chrono::{Duration, Utc};
use returns_integration_tests::TestContext;
use returns_server::db::ReturnStore;
use returns_server::models::{
    CreateReturnInput, CreateReturnItemInput, NewStatusHistoryEvent, ReasonInput, ReturnFilter,
    ReturnSettings, StatusPatch, TransitionInput,
};
use returns_server::services::{AUTO_APPROVED_REASON, ReturnError, ReturnEvent};

fn request(
    order_id: OrderId,
    reason_id: ReturnReasonId,
    lines: &[(i32, i32)],
) -> CreateReturnInput {
    CreateReturnInput {
        order_id,
        reason_id,
        resolution_type: ResolutionType::Refund,
        items: lines
            .iter()
            .map(|&(id, quantity)| CreateReturnItemInput {
                order_item_id: OrderItemId::new(id),
                quantity,
            })
            .collect(),
        reason_notes: Some("box was crushed".to_string()),
        return_shipping_cost: None,
        photo_urls: Vec::new(),
    }
}

fn with_notes(notes: &str) -> TransitionInput {
    TransitionInput {
        notes: Some(notes.to_string()),
        ..TransitionInput::default()
    }
}

// =============================================================================
// Quantity claims
// =============================================================================

#[tokio::test]
async fn test_claims_accumulate_across_live_returns() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 3, 2_500)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    ctx.engine
        .create(request(order, reason, &[(11, 2)]))
        .await
        .unwrap();
    let err = ctx
        .engine
        .create(request(order, reason, &[(11, 2)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReturnError::QuantityExceeded {
            already_claimed: 2,
            requested: 2,
            ..
        }
    ));

    // The remaining unit is still claimable.
    ctx.engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejected_and_cancelled_returns_release_their_claim() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 2, 2_500)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let first = ctx
        .engine
        .create(request(order, reason, &[(11, 2)]))
        .await
        .unwrap();
    ctx.engine
        .reject(
            first.request.id,
            TransitionInput {
                rejection_reason: Some("worn".to_string()),
                ..TransitionInput::default()
            },
        )
        .await
        .unwrap();

    let second = ctx
        .engine
        .create(request(order, reason, &[(11, 2)]))
        .await
        .unwrap();
    ctx.engine
        .cancel(second.request.id, TransitionInput::default())
        .await
        .unwrap();

    ctx.engine
        .create(request(order, reason, &[(11, 2)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_creates_cannot_overclaim() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 3, 2_500)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = ctx.engine.clone();
            tokio::spawn(async move { engine.create(request(order, reason, &[(11, 2)])).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(ReturnError::QuantityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(ctx.engine.list_for_order(order).await.unwrap().len(), 1);
}

// =============================================================================
// Ledger
// =============================================================================

#[tokio::test]
async fn test_ledger_replays_to_current_status() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request
        .id;

    ctx.engine.dispute(id, with_notes("customer disagrees")).await.unwrap();
    ctx.engine.approve(id, TransitionInput::default()).await.unwrap();
    ctx.engine
        .schedule_pickup(
            id,
            TransitionInput {
                tracking_number: Some("PATHAO-123".to_string()),
                ..TransitionInput::default()
            },
        )
        .await
        .unwrap();
    ctx.engine.mark_in_transit(id, TransitionInput::default()).await.unwrap();
    ctx.engine.mark_received(id, TransitionInput::default()).await.unwrap();
    ctx.engine.mark_inspected(id, with_notes("all good")).await.unwrap();

    let detail = ctx.engine.get(id).await.unwrap();
    let replayed = replay(detail.history.iter().map(LedgerEntry::from)).unwrap();
    assert_eq!(replayed, ReturnStatus::Inspected);
    assert_eq!(replayed, detail.request.status);
    assert_eq!(detail.history.len(), 7);
    assert_eq!(
        detail.history[0].change_reason.as_deref(),
        Some("box was crushed")
    );
    assert_eq!(
        detail.history[1].change_reason.as_deref(),
        Some("customer disagrees")
    );
    assert_eq!(
        detail.request.pickup_tracking_number.as_deref(),
        Some("PATHAO-123")
    );

    let history = ctx.engine.history(id).await.unwrap();
    assert_eq!(history.len(), detail.history.len());
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn test_ledger_stays_ordered_when_the_clock_steps_back() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let created = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request;

    // Another node with a fast clock approved the return an hour "from now".
    let skewed = Utc::now() + Duration::hours(1);
    let mut tx = ctx.store.begin().await.unwrap();
    tx.update_status(
        created.id,
        created.version,
        &StatusPatch::entering(ReturnStatus::Approved, skewed),
    )
    .await
    .unwrap();
    tx.append_history(&NewStatusHistoryEvent {
        return_request_id: created.id,
        from_status: Some(ReturnStatus::Requested),
        to_status: ReturnStatus::Approved,
        change_reason: None,
        created_at: skewed,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    ctx.engine
        .mark_received(created.id, TransitionInput::default())
        .await
        .unwrap();

    let history = ctx.engine.history(created.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));
    assert_eq!(history[2].to_status, ReturnStatus::Received);
    assert_eq!(
        replay(history.iter().map(LedgerEntry::from)).unwrap(),
        ReturnStatus::Received
    );
}

#[tokio::test]
async fn test_dispute_reopen_keeps_first_approval_time() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request
        .id;

    let approved = ctx.engine.approve(id, TransitionInput::default()).await.unwrap();
    let first_approval = approved.approved_at;
    assert!(first_approval.is_some());

    ctx.engine
        .dispute(id, with_notes("customer says item was never picked up"))
        .await
        .unwrap();
    let reopened = ctx.engine.approve(id, TransitionInput::default()).await.unwrap();

    assert_eq!(reopened.status, ReturnStatus::Approved);
    assert_eq!(reopened.approved_at, first_approval);
    let edges: Vec<_> = ctx
        .engine
        .history(id)
        .await
        .unwrap()
        .iter()
        .map(|e| (e.from_status, e.to_status))
        .collect();
    assert_eq!(
        edges,
        vec![
            (None, ReturnStatus::Requested),
            (Some(ReturnStatus::Requested), ReturnStatus::Approved),
            (Some(ReturnStatus::Approved), ReturnStatus::Disputed),
            (Some(ReturnStatus::Disputed), ReturnStatus::Approved),
        ]
    );
}

#[tokio::test]
async fn test_illegal_transition_reports_allowed_targets() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request
        .id;

    let err = ctx
        .engine
        .complete(id, TransitionInput::default())
        .await
        .unwrap_err();
    match err {
        ReturnError::IllegalTransition { from, to, allowed } => {
            assert_eq!(from, ReturnStatus::Requested);
            assert_eq!(to, ReturnStatus::Completed);
            assert_eq!(allowed, ReturnStatus::Requested.allowed_targets());
        }
        other => panic!("expected IllegalTransition, got {other}"),
    }

    ctx.engine.cancel(id, TransitionInput::default()).await.unwrap();
    let err = ctx
        .engine
        .approve(id, TransitionInput::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReturnError::IllegalTransition { ref allowed, .. } if allowed.is_empty()
    ));
    assert_eq!(ctx.engine.history(id).await.unwrap().len(), 2);
}

// =============================================================================
// Idempotence and concurrency
// =============================================================================

#[tokio::test]
async fn test_repeated_transition_is_a_no_op() {
    let mut ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request
        .id;

    let first = ctx.engine.approve(id, TransitionInput::default()).await.unwrap();
    ctx.drain_events();
    let second = ctx.engine.approve(id, with_notes("again")).await.unwrap();

    assert_eq!(first.version, second.version);
    assert_eq!(first.approved_at, second.approved_at);
    assert_eq!(ctx.engine.history(id).await.unwrap().len(), 2);
    assert!(ctx.drain_events().is_empty());
}

#[tokio::test]
async fn test_stale_version_is_a_concurrent_modification() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let created = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request;
    let seen = TransitionInput {
        expected_version: Some(created.version),
        ..TransitionInput::default()
    };

    ctx.engine.approve(created.id, seen.clone()).await.unwrap();
    let err = ctx.engine.cancel(created.id, seen).await.unwrap_err();

    assert!(matches!(
        err,
        ReturnError::ConcurrentModification { id } if id == created.id
    ));
    let current = ctx.engine.get(created.id).await.unwrap().request;
    assert_eq!(current.status, ReturnStatus::Approved);
}

#[tokio::test]
async fn test_racing_transitions_have_one_winner() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let created = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request;

    let (id, version) = (created.id, created.version);
    let targets = [ReturnStatus::Approved, ReturnStatus::Cancelled];
    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| {
            let engine = ctx.engine.clone();
            let input = TransitionInput {
                expected_version: Some(version),
                ..TransitionInput::default()
            };
            tokio::spawn(async move { engine.transition(id, target, input).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => winners.push(updated.status),
            Err(ReturnError::ConcurrentModification { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(ctx.engine.history(id).await.unwrap().len(), 2);
}

// =============================================================================
// Policy
// =============================================================================

#[tokio::test]
async fn test_auto_approve_writes_two_rows_and_two_events() {
    let mut ctx = TestContext::new();
    ctx.settings(|s| s.auto_approve_returns = true).await;
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;

    let detail = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();

    assert_eq!(detail.request.status, ReturnStatus::Approved);
    assert!(detail.request.approved_at.is_some());
    assert_eq!(detail.history.len(), 2);
    assert_eq!(
        detail.history[1].change_reason.as_deref(),
        Some(AUTO_APPROVED_REASON)
    );

    let events = ctx.drain_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        ReturnEvent::ReturnCreated {
            status: ReturnStatus::Approved,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        ReturnEvent::ReturnStatusChanged {
            from: ReturnStatus::Requested,
            to: ReturnStatus::Approved,
            ..
        }
    ));
}

#[tokio::test]
async fn test_policy_switches_block_creation() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;

    ctx.settings(|s| s.allow_exchange = false).await;
    let mut input = request(order, reason, &[(11, 1)]);
    input.resolution_type = ResolutionType::Exchange;
    assert!(matches!(
        ctx.engine.create(input).await.unwrap_err(),
        ReturnError::ResolutionNotAllowed(ResolutionType::Exchange)
    ));

    ctx.settings(|s| s.returns_enabled = false).await;
    assert!(matches!(
        ctx.engine
            .create(request(order, reason, &[(11, 1)]))
            .await
            .unwrap_err(),
        ReturnError::ReturnsDisabled
    ));
}

#[tokio::test]
async fn test_disabling_returns_blocks_approval_but_not_other_moves() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 2, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let id = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request
        .id;

    ctx.settings(|s| s.returns_enabled = false).await;
    assert!(matches!(
        ctx.engine
            .approve(id, TransitionInput::default())
            .await
            .unwrap_err(),
        ReturnError::ReturnsDisabled
    ));
    ctx.engine.cancel(id, TransitionInput::default()).await.unwrap();
}

#[tokio::test]
async fn test_order_must_be_delivered() {
    let ctx = TestContext::new();
    let order = ctx
        .order(1, OrderStatus::Shipped, None, &[(11, 1, 9_900)])
        .await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;

    let err = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReturnError::InvalidOrderState {
            status: OrderStatus::Shipped,
            ..
        }
    ));

    let err = ctx
        .engine
        .create(request(OrderId::new(404), reason, &[(11, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReturnError::NotFound(_)));
}

#[tokio::test]
async fn test_photo_rules() {
    let ctx = TestContext::new();
    ctx.settings(|s| s.max_photos_per_return = 2).await;
    let order = ctx.delivered_order(1, 1, &[(11, 3, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, true).await;

    let err = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReturnError::PhotosRequired));

    let mut input = request(order, reason, &[(11, 1)]);
    input.photo_urls = vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()];
    let err = ctx.engine.create(input).await.unwrap_err();
    assert!(matches!(err, ReturnError::TooManyPhotos { max: 2, got: 3 }));

    let mut input = request(order, reason, &[(11, 1)]);
    input.photo_urls = vec![" a.jpg ".into(), String::new()];
    let detail = ctx.engine.create(input).await.unwrap();
    assert_eq!(detail.request.photo_urls, vec!["a.jpg".to_string()]);
}

#[tokio::test]
async fn test_default_shipping_cost_applies_when_omitted() {
    let ctx = TestContext::new();
    ctx.settings(|s| s.default_return_shipping_cost = Money::from_cents(12_000))
        .await;
    let order = ctx.delivered_order(1, 1, &[(11, 1, 10_000)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let detail = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();

    assert_eq!(detail.request.return_shipping_cost, Money::from_cents(12_000));
    // Shipping larger than the refund clamps at zero.
    assert_eq!(detail.request.net_refund_amount, Money::ZERO);
}

#[tokio::test]
async fn test_unbounded_window_accepts_old_orders() {
    let ctx = TestContext::new();
    ctx.settings(|s| s.return_window_days = i32::MAX).await;
    let order = ctx.delivered_order(1, 3_650, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;

    let detail = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();
    assert_eq!(detail.request.status, ReturnStatus::Requested);
}

#[tokio::test]
async fn test_amounts_must_fit_whole_cents() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 2, 100_000)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;

    let mut fractional = request(order, reason, &[(11, 1)]);
    fractional.return_shipping_cost = Some(Money::new(rust_decimal::Decimal::new(5, 3)));
    assert!(matches!(
        ctx.engine.create(fractional).await.unwrap_err(),
        ReturnError::InvalidInput(_)
    ));

    let mut huge = request(order, reason, &[(11, 1)]);
    huge.return_shipping_cost = Some(Money::MAX + Money::from_cents(1));
    assert!(matches!(
        ctx.engine.create(huge).await.unwrap_err(),
        ReturnError::InvalidInput(_)
    ));
    assert!(ctx.engine.list_for_order(order).await.unwrap().is_empty());

    let expensive = ctx
        .delivered_order(2, 1, &[(21, 2, 999_999_999_999)])
        .await;
    assert!(matches!(
        ctx.engine
            .create(request(expensive, reason, &[(21, 2)]))
            .await
            .unwrap_err(),
        ReturnError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn test_invalid_settings_are_refused() {
    let ctx = TestContext::new();
    let bad = ReturnSettings {
        return_window_days: -1,
        max_photos_per_return: 0,
        ..ReturnSettings::default()
    };

    let err = ctx.engine.update_settings(&bad).await.unwrap_err();
    match err {
        ReturnError::InvalidSettings(problems) => assert_eq!(problems.len(), 2),
        other => panic!("expected InvalidSettings, got {other}"),
    }
    assert_eq!(
        ctx.engine.get_settings().await.unwrap(),
        ReturnSettings::default()
    );
}

// =============================================================================
// Reasons, notes and listing
// =============================================================================

#[tokio::test]
async fn test_referenced_reason_can_only_be_disabled() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 2, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    ctx.engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();

    assert!(matches!(
        ctx.engine.delete_reason(reason).await.unwrap_err(),
        ReturnError::ReasonInUse { id } if id == reason
    ));

    let disabled = ctx.engine.set_reason_active(reason, false).await.unwrap();
    assert!(!disabled.is_active);
    assert!(ctx.engine.list_reasons(true).await.unwrap().is_empty());
    assert_eq!(ctx.engine.list_reasons(false).await.unwrap().len(), 1);

    // A disabled reason cannot be picked for new returns.
    assert!(matches!(
        ctx.engine
            .create(request(order, reason, &[(11, 1)]))
            .await
            .unwrap_err(),
        ReturnError::InvalidInput(_)
    ));

    let unused = ctx
        .engine
        .create_reason(&ReasonInput {
            label: "Arrived late".to_string(),
            fault_type: FaultType::MerchantFault,
            requires_photos: false,
            is_active: true,
            position: 5,
        })
        .await
        .unwrap();
    ctx.engine.delete_reason(unused.id).await.unwrap();
    assert!(matches!(
        ctx.engine.get_reason(unused.id).await.unwrap_err(),
        ReturnError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_merchant_notes_do_not_touch_the_ledger() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 1, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let created = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request;

    let updated = ctx
        .engine
        .update_merchant_notes(created.id, Some("called the customer".to_string()))
        .await
        .unwrap();

    assert_eq!(updated.merchant_notes.as_deref(), Some("called the customer"));
    assert_eq!(updated.status, created.status);
    assert_eq!(updated.version, created.version);
    assert_eq!(ctx.engine.history(created.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_filters_by_status_and_search() {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 1, &[(11, 5, 9_900)]).await;
    let reason = ctx.reason(FaultType::MerchantFault, false).await;
    let first = ctx
        .engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap()
        .request;
    ctx.engine
        .create(request(order, reason, &[(11, 1)]))
        .await
        .unwrap();
    ctx.engine
        .approve(first.id, TransitionInput::default())
        .await
        .unwrap();

    let approved = ctx
        .engine
        .list(&ReturnFilter {
            status: Some(ReturnStatus::Approved),
            ..ReturnFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, first.id);

    let by_number = ctx
        .engine
        .list(&ReturnFilter {
            search: Some(first.return_number.as_str().to_lowercase()),
            ..ReturnFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_number.len(), 1);

    let all = ctx.engine.list(&ReturnFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].requested_at >= all[1].requested_at);
}
