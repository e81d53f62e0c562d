//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::services::LifecycleEngine;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: LifecycleEngine,
    pool: Option<PgPool>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// `pool` is `None` when the service runs on the in-memory store; the
    /// readiness probe then has nothing to ping.
    #[must_use]
    pub fn new(engine: LifecycleEngine, pool: Option<PgPool>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { engine, pool }),
        }
    }

    /// Get a reference to the lifecycle engine.
    #[must_use]
    pub fn engine(&self) -> &LifecycleEngine {
        &self.inner.engine
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
