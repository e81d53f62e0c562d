//! CLI subcommands.

pub mod migrate;
pub mod seed;
pub mod timeline;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

use returns_server::db;

/// Errors shared by commands that talk to the database.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Connect using `RETURNS_DATABASE_URL`, falling back to `DATABASE_URL`.
async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("RETURNS_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("RETURNS_DATABASE_URL"))?;

    tracing::info!("Connecting to returns database...");
    Ok(db::create_pool(&database_url).await?)
}
