//! Return policy settings storage.
//!
//! The policy lives in a single typed row (`returns.return_settings`,
//! `id = 1`). [`CachedSettings`] puts a short-lived in-process cache in front
//! of any [`SettingsStore`], since every return creation reads the policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument};

use returns_core::Money;

use super::{RepositoryError, SettingsStore};
use crate::models::ReturnSettings;

/// Internal row type for the settings row.
#[derive(Debug, sqlx::FromRow)]
struct ReturnSettingsRow {
    returns_enabled: bool,
    return_window_days: i32,
    max_photos_per_return: i32,
    allow_refund: bool,
    allow_exchange: bool,
    allow_store_credit: bool,
    auto_approve_returns: bool,
    require_return_photos: bool,
    policy_text: String,
    default_return_shipping_cost: Decimal,
}

impl From<ReturnSettingsRow> for ReturnSettings {
    fn from(row: ReturnSettingsRow) -> Self {
        Self {
            returns_enabled: row.returns_enabled,
            return_window_days: row.return_window_days,
            max_photos_per_return: row.max_photos_per_return,
            allow_refund: row.allow_refund,
            allow_exchange: row.allow_exchange,
            allow_store_credit: row.allow_store_credit,
            auto_approve_returns: row.auto_approve_returns,
            require_return_photos: row.require_return_photos,
            policy_text: row.policy_text,
            default_return_shipping_cost: Money::new(row.default_return_shipping_cost),
        }
    }
}

/// `PostgreSQL` implementation of [`SettingsStore`].
#[derive(Debug, Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    /// Create a new settings store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<ReturnSettings, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnSettingsRow>(
            r"
            SELECT returns_enabled, return_window_days, max_photos_per_return,
                   allow_refund, allow_exchange, allow_store_credit,
                   auto_approve_returns, require_return_photos, policy_text,
                   default_return_shipping_cost
            FROM returns.return_settings
            WHERE id = 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into).unwrap_or_default())
    }

    #[instrument(skip(self, settings))]
    async fn save(&self, settings: &ReturnSettings) -> Result<ReturnSettings, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnSettingsRow>(
            r"
            INSERT INTO returns.return_settings (
                id, returns_enabled, return_window_days, max_photos_per_return,
                allow_refund, allow_exchange, allow_store_credit, auto_approve_returns,
                require_return_photos, policy_text, default_return_shipping_cost
            )
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                returns_enabled = EXCLUDED.returns_enabled,
                return_window_days = EXCLUDED.return_window_days,
                max_photos_per_return = EXCLUDED.max_photos_per_return,
                allow_refund = EXCLUDED.allow_refund,
                allow_exchange = EXCLUDED.allow_exchange,
                allow_store_credit = EXCLUDED.allow_store_credit,
                auto_approve_returns = EXCLUDED.auto_approve_returns,
                require_return_photos = EXCLUDED.require_return_photos,
                policy_text = EXCLUDED.policy_text,
                default_return_shipping_cost = EXCLUDED.default_return_shipping_cost,
                updated_at = NOW()
            RETURNING returns_enabled, return_window_days, max_photos_per_return,
                      allow_refund, allow_exchange, allow_store_credit,
                      auto_approve_returns, require_return_photos, policy_text,
                      default_return_shipping_cost
            ",
        )
        .bind(settings.returns_enabled)
        .bind(settings.return_window_days)
        .bind(settings.max_photos_per_return)
        .bind(settings.allow_refund)
        .bind(settings.allow_exchange)
        .bind(settings.allow_store_credit)
        .bind(settings.auto_approve_returns)
        .bind(settings.require_return_photos)
        .bind(&settings.policy_text)
        .bind(settings.default_return_shipping_cost)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Caches [`SettingsStore::load`] for a short TTL; writes refresh the cache.
#[derive(Clone)]
pub struct CachedSettings {
    inner: Arc<dyn SettingsStore>,
    cache: Cache<(), ReturnSettings>,
}

impl std::fmt::Debug for CachedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSettings")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl CachedSettings {
    /// Wrap a settings store.
    #[must_use]
    pub fn new(inner: Arc<dyn SettingsStore>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self { inner, cache }
    }

    /// Drop the cached value.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }
}

#[async_trait]
impl SettingsStore for CachedSettings {
    async fn load(&self) -> Result<ReturnSettings, RepositoryError> {
        if let Some(settings) = self.cache.get(&()).await {
            debug!("Cache hit for return settings");
            return Ok(settings);
        }

        let settings = self.inner.load().await?;
        self.cache.insert((), settings.clone()).await;
        Ok(settings)
    }

    async fn save(&self, settings: &ReturnSettings) -> Result<ReturnSettings, RepositoryError> {
        let saved = self.inner.save(settings).await;
        // A failed write may still have landed; never serve a stale copy.
        self.invalidate().await;
        let saved = saved?;
        self.cache.insert((), saved.clone()).await;
        Ok(saved)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts loads so cache hits are observable.
    #[derive(Default)]
    struct CountingStore {
        loads: AtomicUsize,
        settings: tokio::sync::Mutex<ReturnSettings>,
    }

    #[async_trait]
    impl SettingsStore for CountingStore {
        async fn load(&self) -> Result<ReturnSettings, RepositoryError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.settings.lock().await.clone())
        }

        async fn save(
            &self,
            settings: &ReturnSettings,
        ) -> Result<ReturnSettings, RepositoryError> {
            *self.settings.lock().await = settings.clone();
            Ok(settings.clone())
        }
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let store = Arc::new(CountingStore::default());
        let cached = CachedSettings::new(store.clone(), Duration::from_secs(60));

        cached.load().await.unwrap();
        cached.load().await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_cached_value() {
        let store = Arc::new(CountingStore::default());
        let cached = CachedSettings::new(store.clone(), Duration::from_secs(60));
        assert_eq!(cached.load().await.unwrap().return_window_days, 7);

        let updated = ReturnSettings {
            return_window_days: 30,
            ..ReturnSettings::default()
        };
        cached.save(&updated).await.unwrap();

        assert_eq!(cached.load().await.unwrap().return_window_days, 30);
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    }
}
