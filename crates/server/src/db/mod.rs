//! Persistence for the returns service.
//!
//! # Schema: `returns`
//!
//! ## Tables
//!
//! - `return_reasons` - Merchant-configured reason catalog
//! - `return_settings` - Return policy (single row, `id = 1`)
//! - `return_requests` - Return aggregates
//! - `return_items` - Returned order lines (immutable)
//! - `return_status_history` - Append-only status ledger
//!
//! `public.orders` and `public.order_items` belong to the storefront and are
//! only ever read.
//!
//! # Stores
//!
//! The lifecycle engine talks to storage through the traits below. The
//! `Pg*` types are the production implementations; [`memory::InMemoryStore`]
//! implements every trait over plain collections for tests and local runs.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p returns-cli -- migrate
//! ```

pub mod memory;
pub mod orders;
pub mod reasons;
pub mod returns;
pub mod settings;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use returns_core::{OrderId, OrderItemId, ReturnNumber, ReturnReasonId, ReturnRequestId};

use crate::models::{
    NewReturnItem, NewReturnRequest, NewStatusHistoryEvent, Order, OrderItem, ReasonInput,
    ReturnFilter, ReturnItem, ReturnReason, ReturnRequest, ReturnSettings, StatusHistoryEvent,
    StatusPatch,
};

pub use memory::InMemoryStore;
pub use orders::PgOrderSource;
pub use reasons::PgReasonCatalog;
pub use returns::PgReturnStore;
pub use settings::{CachedSettings, PgSettingsStore};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a reason still referenced by returns).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The row changed since it was read.
    #[error("version mismatch: expected {expected}")]
    VersionMismatch {
        /// Version the writer read.
        expected: i32,
    },
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// The stores the lifecycle engine works against.
#[derive(Clone)]
pub struct Stores {
    /// Return aggregates and ledger.
    pub returns: Arc<dyn ReturnStore>,
    /// Reason catalog.
    pub reasons: Arc<dyn ReasonCatalog>,
    /// Return policy.
    pub settings: Arc<dyn SettingsStore>,
    /// Storefront orders.
    pub orders: Arc<dyn OrderSource>,
}

impl Stores {
    /// `PostgreSQL` stores sharing one pool, with settings cached for `settings_ttl`.
    #[must_use]
    pub fn postgres(pool: PgPool, settings_ttl: Duration) -> Self {
        Self {
            returns: Arc::new(PgReturnStore::new(pool.clone())),
            reasons: Arc::new(PgReasonCatalog::new(pool.clone())),
            settings: Arc::new(CachedSettings::new(
                Arc::new(PgSettingsStore::new(pool.clone())),
                settings_ttl,
            )),
            orders: Arc::new(PgOrderSource::new(pool)),
        }
    }

    /// Every store backed by one [`InMemoryStore`].
    #[must_use]
    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self {
            returns: Arc::new(store.clone()),
            reasons: Arc::new(store.clone()),
            settings: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
        }
    }
}

// =============================================================================
// Store traits
// =============================================================================

/// Return aggregates, their items and their ledger.
#[async_trait]
pub trait ReturnStore: Send + Sync {
    /// Start a unit of work. Dropping it without [`ReturnTx::commit`] rolls
    /// everything back.
    async fn begin(&self) -> Result<Box<dyn ReturnTx>, RepositoryError>;

    /// Fetch one return.
    async fn get_return(
        &self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError>;

    /// Items of one return, in insertion order.
    async fn list_items(&self, id: ReturnRequestId) -> Result<Vec<ReturnItem>, RepositoryError>;

    /// Returns matching a filter, newest first.
    async fn list_returns(
        &self,
        filter: &ReturnFilter,
    ) -> Result<Vec<ReturnRequest>, RepositoryError>;

    /// All returns against one order, newest first.
    async fn list_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<ReturnRequest>, RepositoryError>;

    /// The ledger of one return, ordered by `(created_at, id)`.
    ///
    /// The stream is lazy and finite; calling again restarts it from the
    /// first row.
    fn history(
        &self,
        id: ReturnRequestId,
    ) -> BoxStream<'_, Result<StatusHistoryEvent, RepositoryError>>;

    /// Replace merchant notes. Touches neither status nor version.
    async fn update_merchant_notes(
        &self,
        id: ReturnRequestId,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReturnRequest, RepositoryError>;
}

/// A unit of work against the return tables.
#[async_trait]
pub trait ReturnTx: Send {
    /// Serialize return creation for one order until commit or rollback.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<(), RepositoryError>;

    /// Units of each order line claimed by returns that still count
    /// (neither rejected nor cancelled).
    async fn claimed_quantities(
        &mut self,
        order_id: OrderId,
    ) -> Result<HashMap<OrderItemId, i64>, RepositoryError>;

    /// Whether a return number has ever been issued.
    async fn return_number_exists(
        &mut self,
        number: &ReturnNumber,
    ) -> Result<bool, RepositoryError>;

    /// Insert the aggregate with status `requested` and version 1.
    async fn insert_return(
        &mut self,
        new: &NewReturnRequest,
    ) -> Result<ReturnRequest, RepositoryError>;

    /// Insert the items of a freshly inserted return.
    async fn insert_items(
        &mut self,
        id: ReturnRequestId,
        items: &[NewReturnItem],
    ) -> Result<Vec<ReturnItem>, RepositoryError>;

    /// Read a return inside the unit of work.
    async fn fetch_return(
        &mut self,
        id: ReturnRequestId,
    ) -> Result<Option<ReturnRequest>, RepositoryError>;

    /// Apply a status change if the stored version still equals
    /// `expected_version`, bumping it.
    ///
    /// Fails with [`RepositoryError::VersionMismatch`] otherwise.
    async fn update_status(
        &mut self,
        id: ReturnRequestId,
        expected_version: i32,
        patch: &StatusPatch,
    ) -> Result<ReturnRequest, RepositoryError>;

    /// Append a ledger row.
    async fn append_history(
        &mut self,
        event: &NewStatusHistoryEvent,
    ) -> Result<StatusHistoryEvent, RepositoryError>;

    /// Make every write of this unit visible atomically.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Return reason catalog.
#[async_trait]
pub trait ReasonCatalog: Send + Sync {
    /// Reasons ordered by `(position, id)`, optionally only active ones.
    async fn list_reasons(&self, active_only: bool) -> Result<Vec<ReturnReason>, RepositoryError>;

    /// Fetch one reason.
    async fn get_reason(
        &self,
        id: ReturnReasonId,
    ) -> Result<Option<ReturnReason>, RepositoryError>;

    /// Add a reason.
    async fn create_reason(
        &self,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError>;

    /// Replace a reason's fields.
    async fn update_reason(
        &self,
        id: ReturnReasonId,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError>;

    /// Enable or soft-disable a reason.
    async fn set_reason_active(
        &self,
        id: ReturnReasonId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError>;

    /// Hard-delete a reason.
    ///
    /// Fails with [`RepositoryError::Conflict`] while any return references it.
    async fn delete_reason(&self, id: ReturnReasonId) -> Result<(), RepositoryError>;
}

/// Return policy storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings; defaults when nothing has been saved yet.
    async fn load(&self) -> Result<ReturnSettings, RepositoryError>;

    /// Overwrite the settings row.
    async fn save(&self, settings: &ReturnSettings) -> Result<ReturnSettings, RepositoryError>;
}

/// Read access to storefront orders.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Fetch one order.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Lines of one order.
    async fn list_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>;
}
