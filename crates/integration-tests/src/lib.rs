//! Integration tests for the returns service.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p returns-integration-tests
//! ```
//!
//! The tests run the lifecycle engine against [`InMemoryStore`], which
//! implements the same store traits as the `PostgreSQL` repositories, and
//! drive the HTTP router in-process with `tower::ServiceExt::oneshot`.
//!
//! # Test Categories
//!
//! - `scenarios` - End-to-end return scenarios
//! - `lifecycle` - Invariants, idempotence, concurrency and events
//! - `http_api` - JSON API status codes and bodies

use chrono::{Duration, Utc};
use tokio::sync::mpsc;

use returns_core::{
    FaultType, Money, OrderId, OrderItemId, OrderStatus, ProductId, ReturnReasonId,
};
use returns_server::db::{InMemoryStore, Stores};
use returns_server::models::{Order, OrderItem, ReasonInput, ReturnSettings};
use returns_server::services::{EventOutbox, LifecycleEngine, ReturnEvent};
use returns_server::state::AppState;

/// One order line to seed: `(order_item_id, quantity, unit price in cents)`.
pub type Line = (i32, i32, i64);

/// Engine wired to a fresh in-memory store, with the event receiver kept
/// so tests can observe what was published.
pub struct TestContext {
    pub store: InMemoryStore,
    pub engine: LifecycleEngine,
    pub events: mpsc::Receiver<ReturnEvent>,
}

impl TestContext {
    /// Fresh store with default settings and an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let (outbox, events) = EventOutbox::new(64);
        let engine = LifecycleEngine::new(Stores::in_memory(&store), outbox);
        Self {
            store,
            engine,
            events,
        }
    }

    /// Router over the same engine, as the binary serves it.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        returns_server::app(AppState::new(self.engine.clone(), None))
    }

    /// Seed an order delivered `days_ago` days ago.
    pub async fn delivered_order(&self, id: i32, days_ago: i64, lines: &[Line]) -> OrderId {
        self.order(id, OrderStatus::Delivered, Some(days_ago), lines)
            .await
    }

    /// Seed an order in any status.
    pub async fn order(
        &self,
        id: i32,
        status: OrderStatus,
        delivered_days_ago: Option<i64>,
        lines: &[Line],
    ) -> OrderId {
        let order_id = OrderId::new(id);
        let items = lines
            .iter()
            .map(|&(item_id, quantity, cents)| OrderItem {
                id: OrderItemId::new(item_id),
                order_id,
                product_id: ProductId::new(item_id * 10),
                variant_id: None,
                product_name: format!("Product {item_id}"),
                variant_label: None,
                quantity,
                unit_price: Money::from_cents(cents),
            })
            .collect();
        let order = Order {
            id: order_id,
            status,
            delivered_at: delivered_days_ago.map(|days| Utc::now() - Duration::days(days)),
            customer_name: "Rahim Uddin".to_string(),
            customer_phone: Some("+8801700000000".to_string()),
        };
        self.store.insert_order(order, items).await;
        order_id
    }

    /// Add an active reason.
    ///
    /// # Panics
    ///
    /// Panics if the catalog rejects the reason.
    #[allow(clippy::unwrap_used)]
    pub async fn reason(&self, fault_type: FaultType, requires_photos: bool) -> ReturnReasonId {
        let label = match fault_type {
            FaultType::MerchantFault => "Damaged on arrival",
            FaultType::CustomerFault => "Changed my mind",
        };
        self.engine
            .create_reason(&ReasonInput {
                label: label.to_string(),
                fault_type,
                requires_photos,
                is_active: true,
                position: 0,
            })
            .await
            .unwrap()
            .id
    }

    /// Replace settings after applying `edit` to the defaults.
    ///
    /// # Panics
    ///
    /// Panics if the edited settings are invalid.
    #[allow(clippy::unwrap_used)]
    pub async fn settings(&self, edit: impl FnOnce(&mut ReturnSettings)) {
        let mut settings = ReturnSettings::default();
        edit(&mut settings);
        self.engine.update_settings(&settings).await.unwrap();
    }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<ReturnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
