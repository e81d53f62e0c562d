//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! returns-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `RETURNS_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Returns migrations live in `crates/server/migrations/`. They create the
//! `returns` schema; the storefront's `public.orders` and
//! `public.order_items` must already exist.

use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run returns database migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    let pool = connect().await?;

    tracing::info!("Running returns migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Returns migrations complete!");
    Ok(())
}
