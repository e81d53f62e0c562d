//! JSON API tests: status codes, error bodies and routing.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use returns_core::{FaultType, Money};
use returns_integration_tests::TestContext;

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

async fn seeded() -> (TestContext, Router, Value) {
    let ctx = TestContext::new();
    let order = ctx.delivered_order(1, 2, &[(11, 3, 100_000)]).await;
    let reason = ctx.reason(FaultType::CustomerFault, false).await;
    let app = ctx.router();
    let create = json!({
        "order_id": order,
        "reason_id": reason,
        "resolution_type": "refund",
        "items": [{ "order_item_id": 11, "quantity": 2 }],
        "return_shipping_cost": "50.00",
    });
    (ctx, app, create)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (status, _) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Returns
// =============================================================================

#[tokio::test]
async fn test_create_and_fetch_return() {
    let (_ctx, app, create) = seeded().await;

    let (status, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["request"]["status"], "requested");
    assert_eq!(body["request"]["shipping_paid_by"], "customer");
    let net: Money = serde_json::from_value(body["request"]["net_refund_amount"].clone()).unwrap();
    assert_eq!(net, Money::from_cents(195_000));

    let id = body["request"]["id"].as_i64().unwrap();
    let (status, body) = send(&app, Method::GET, &format!("/returns/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::GET, "/orders/1/returns", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_transitions_over_http() {
    let (_ctx, app, create) = seeded().await;
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let id = body["request"]["id"].as_i64().unwrap();

    // No body is the same as an empty one.
    let (status, body) = send(&app, Method::POST, &format!("/returns/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/returns/{id}/schedule-pickup"),
        Some(json!({ "tracking_number": "STEADFAST-42" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pickup_tracking_number"], "STEADFAST-42");

    let (status, body) = send(&app, Method::GET, &format!("/returns/{id}/history"), None).await;
    assert_eq!(status, StatusCode::OK);
    let edges: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["to_status"].as_str().unwrap())
        .collect();
    assert_eq!(edges, ["requested", "approved", "pickup_scheduled"]);
}

#[tokio::test]
async fn test_reject_without_reason_is_unprocessable() {
    let (_ctx, app, create) = seeded().await;
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let id = body["request"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/returns/{id}/reject"),
        Some(json!({ "notes": "no reason given" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "missing_rejection_reason");
    assert_eq!(body["details"]["current"], "requested");
}

#[tokio::test]
async fn test_illegal_transition_is_a_conflict() {
    let (_ctx, app, create) = seeded().await;
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let id = body["request"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, Method::POST, &format!("/returns/{id}/complete"), None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "illegal_transition");
    assert_eq!(body["details"]["current"], "requested");
    assert_eq!(body["details"]["target"], "completed");
    assert_eq!(
        body["details"]["allowed"],
        json!(["approved", "rejected", "cancelled", "disputed"])
    );
}

#[tokio::test]
async fn test_stale_version_is_a_conflict() {
    let (_ctx, app, create) = seeded().await;
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let id = body["request"]["id"].as_i64().unwrap();
    let version = body["request"]["version"].clone();

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/returns/{id}/approve"),
        Some(json!({ "expected_version": version })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/returns/{id}/cancel"),
        Some(json!({ "expected_version": version })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "concurrent_modification");
}

#[tokio::test]
async fn test_policy_violations_are_unprocessable() {
    let (_ctx, app, mut create) = seeded().await;
    create["items"][0]["quantity"] = json!(4);

    let (status, body) = send(&app, Method::POST, "/returns", Some(create)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "quantity_exceeded");
    assert_eq!(body["details"]["ordered"], 3);
    assert_eq!(body["details"]["requested"], 4);
}

#[tokio::test]
async fn test_fractional_cents_are_unprocessable() {
    let (_ctx, app, mut create) = seeded().await;
    create["return_shipping_cost"] = json!("0.005");

    let (status, body) = send(&app, Method::POST, "/returns", Some(create)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn test_unknown_return_is_not_found() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let (status, body) = send(&app, Method::GET, "/returns/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(&app, Method::POST, "/returns/999/approve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_a_bad_request() {
    let (_ctx, app, _) = seeded().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/returns",
        Some(json!({ "order_id": "not a number" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (_ctx, app, create) = seeded().await;
    let mut single = create.clone();
    single["items"][0]["quantity"] = json!(1);
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let first = body["request"]["id"].as_i64().unwrap();
    send(&app, Method::POST, "/returns", Some(single)).await;
    send(&app, Method::POST, &format!("/returns/{first}/cancel"), None).await;

    let (status, body) = send(&app, Method::GET, "/returns?status=cancelled", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"].as_i64().unwrap(), first);

    let (status, body) = send(&app, Method::GET, "/returns", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, Method::GET, "/returns?status=lost", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_merchant_notes_endpoint() {
    let (_ctx, app, create) = seeded().await;
    let (_, body) = send(&app, Method::POST, "/returns", Some(create)).await;
    let id = body["request"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/returns/{id}/notes"),
        Some(json!({ "notes": "  refund via bKash  " })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["merchant_notes"], "refund via bKash");
    assert_eq!(body["status"], "requested");
}

// =============================================================================
// Reasons
// =============================================================================

#[tokio::test]
async fn test_reason_crud() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let (status, body) = send(
        &app,
        Method::POST,
        "/return-reasons",
        Some(json!({ "label": "Wrong size", "fault_type": "customer_fault", "position": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["is_active"], true);
    let id = body["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/return-reasons/{id}"),
        Some(json!({ "label": "Wrong size sent", "fault_type": "merchant_fault" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fault_type"], "merchant_fault");

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/return-reasons/{id}/disable"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    let (_, body) = send(&app, Method::GET, "/return-reasons?active=true", None).await;
    assert!(body.as_array().unwrap().is_empty());
    let (_, body) = send(&app, Method::GET, "/return-reasons", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::DELETE, &format!("/return-reasons/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, _) = send(&app, Method::GET, &format!("/return-reasons/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_a_referenced_reason_conflicts() {
    let (_ctx, app, create) = seeded().await;
    let reason = create["reason_id"].as_i64().unwrap();
    send(&app, Method::POST, "/returns", Some(create)).await;

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/return-reasons/{reason}"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "reason_in_use");
}

#[tokio::test]
async fn test_blank_reason_label_is_unprocessable() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let (status, body) = send(
        &app,
        Method::POST,
        "/return-reasons",
        Some(json!({ "label": "   ", "fault_type": "customer_fault" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_input");
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn test_settings_round_trip_and_validation() {
    let ctx = TestContext::new();
    let app = ctx.router();

    let (status, mut settings) = send(&app, Method::GET, "/return-settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["returns_enabled"], true);

    settings["return_window_days"] = json!(14);
    let (status, body) = send(&app, Method::PUT, "/return-settings", Some(settings.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["return_window_days"], 14);

    settings["max_photos_per_return"] = json!(0);
    let (status, body) = send(&app, Method::PUT, "/return-settings", Some(settings)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_settings");
    assert_eq!(body["details"]["problems"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/return-settings", None).await;
    assert_eq!(body["return_window_days"], 14);
}
