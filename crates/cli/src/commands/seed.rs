//! Seed the reason catalog and the settings row.
//!
//! Reasons are only inserted into an empty catalog unless `--force` is given,
//! so running the command twice is harmless.

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use returns_core::FaultType;
use returns_server::db::{
    PgReasonCatalog, PgSettingsStore, ReasonCatalog, RepositoryError, SettingsStore,
};
use returns_server::models::ReasonInput;

use super::{CommandError, connect};

/// Errors that can occur while seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Stored settings are invalid: {}", .0.join("; "))]
    InvalidSettings(Vec<String>),
}

/// Reasons offered out of the box: (label, fault, requires photos).
const DEFAULT_REASONS: &[(&str, FaultType, bool)] = &[
    ("Damaged on arrival", FaultType::MerchantFault, true),
    ("Wrong item received", FaultType::MerchantFault, true),
    ("Defective or not working", FaultType::MerchantFault, true),
    ("Not as described", FaultType::MerchantFault, false),
    ("Size or fit issue", FaultType::CustomerFault, false),
    ("Changed my mind", FaultType::CustomerFault, false),
];

/// Build the default reason inputs in display order.
fn default_reasons() -> Vec<ReasonInput> {
    DEFAULT_REASONS
        .iter()
        .zip(1..)
        .map(|(&(label, fault_type, requires_photos), position)| ReasonInput {
            label: label.to_string(),
            fault_type,
            requires_photos,
            is_active: true,
            position,
        })
        .collect()
}

/// Seed default reasons and make sure the settings row exists.
///
/// # Errors
///
/// Returns an error if the database is unreachable, a write fails, or the
/// stored settings are out of range.
pub async fn run(force: bool) -> Result<(), SeedError> {
    let pool = connect().await?;
    let catalog = PgReasonCatalog::new(pool.clone());
    let settings_store = PgSettingsStore::new(pool);

    let existing = catalog.list_reasons(false).await?;
    if existing.is_empty() || force {
        let now = Utc::now();
        for input in default_reasons() {
            let reason = catalog.create_reason(&input, now).await?;
            info!(id = %reason.id, label = %reason.label, "Reason created");
        }
    } else {
        info!(
            count = existing.len(),
            "Reasons already present, skipping (use --force to add defaults)"
        );
    }

    // Saving what load returns writes the defaults when the row is missing.
    let settings = settings_store.load().await?;
    settings.validate().map_err(SeedError::InvalidSettings)?;
    settings_store.save(&settings).await?;
    info!(
        returns_enabled = settings.returns_enabled,
        window_days = settings.return_window_days,
        "Settings row ready"
    );

    Ok(())
}
