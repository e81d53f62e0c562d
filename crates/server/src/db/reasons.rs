//! Database operations for the return reason catalog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use returns_core::{FaultType, ReturnReasonId};

use super::{ReasonCatalog, RepositoryError};
use crate::models::{ReasonInput, ReturnReason};

/// Internal row type for `PostgreSQL` reason queries.
#[derive(Debug, sqlx::FromRow)]
struct ReturnReasonRow {
    id: i32,
    label: String,
    fault_type: FaultType,
    requires_photos: bool,
    is_active: bool,
    position: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReturnReasonRow> for ReturnReason {
    fn from(row: ReturnReasonRow) -> Self {
        Self {
            id: ReturnReasonId::new(row.id),
            label: row.label,
            fault_type: row.fault_type,
            requires_photos: row.requires_photos,
            is_active: row.is_active,
            position: row.position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// `PostgreSQL` implementation of [`ReasonCatalog`].
#[derive(Debug, Clone)]
pub struct PgReasonCatalog {
    pool: PgPool,
}

impl PgReasonCatalog {
    /// Create a new reason catalog.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReasonCatalog for PgReasonCatalog {
    #[instrument(skip(self))]
    async fn list_reasons(&self, active_only: bool) -> Result<Vec<ReturnReason>, RepositoryError> {
        let rows = sqlx::query_as::<_, ReturnReasonRow>(
            r"
            SELECT id, label, fault_type, requires_photos, is_active, position,
                   created_at, updated_at
            FROM returns.return_reasons
            WHERE is_active OR NOT $1
            ORDER BY position, id
            ",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn get_reason(
        &self,
        id: ReturnReasonId,
    ) -> Result<Option<ReturnReason>, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnReasonRow>(
            r"
            SELECT id, label, fault_type, requires_photos, is_active, position,
                   created_at, updated_at
            FROM returns.return_reasons
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, input), fields(label = %input.label))]
    async fn create_reason(
        &self,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnReasonRow>(
            r"
            INSERT INTO returns.return_reasons
                (label, fault_type, requires_photos, is_active, position, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id, label, fault_type, requires_photos, is_active, position,
                      created_at, updated_at
            ",
        )
        .bind(input.label.trim())
        .bind(input.fault_type)
        .bind(input.requires_photos)
        .bind(input.is_active)
        .bind(input.position)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self, input))]
    async fn update_reason(
        &self,
        id: ReturnReasonId,
        input: &ReasonInput,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnReasonRow>(
            r"
            UPDATE returns.return_reasons
            SET label = $2, fault_type = $3, requires_photos = $4, is_active = $5,
                position = $6, updated_at = $7
            WHERE id = $1
            RETURNING id, label, fault_type, requires_photos, is_active, position,
                      created_at, updated_at
            ",
        )
        .bind(id)
        .bind(input.label.trim())
        .bind(input.fault_type)
        .bind(input.requires_photos)
        .bind(input.is_active)
        .bind(input.position)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn set_reason_active(
        &self,
        id: ReturnReasonId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<ReturnReason, RepositoryError> {
        let row = sqlx::query_as::<_, ReturnReasonRow>(
            r"
            UPDATE returns.return_reasons
            SET is_active = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, label, fault_type, requires_photos, is_active, position,
                      created_at, updated_at
            ",
        )
        .bind(id)
        .bind(active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn delete_reason(&self, id: ReturnReasonId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM returns.return_reasons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    RepositoryError::Conflict(format!("reason {id} is referenced by returns"))
                }
                other => RepositoryError::Database(other),
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}
