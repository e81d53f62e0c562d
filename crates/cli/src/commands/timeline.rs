//! Print a return's status ledger and verify it replays to the stored status.

use futures::TryStreamExt;
use thiserror::Error;
use tracing::{info, warn};

use returns_core::{LedgerEntry, ReplayError, ReturnRequestId, replay};
use returns_server::db::{PgReturnStore, RepositoryError, ReturnStore};
use returns_server::models::StatusHistoryEvent;

use super::{CommandError, connect};

/// Errors that can occur while auditing a timeline.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Return {0} not found")]
    NotFound(ReturnRequestId),

    #[error("Ledger does not replay: {0}")]
    Replay(#[from] ReplayError),

    #[error("Ledger replays to {replayed}, but the return is {stored}")]
    Mismatch { replayed: String, stored: String },
}

/// Format one ledger row for display.
fn format_event(event: &StatusHistoryEvent) -> String {
    let from = event
        .from_status
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    let reason = event.change_reason.as_deref().unwrap_or("");
    format!(
        "{}  {from} -> {}  {reason}",
        event.created_at.format("%Y-%m-%d %H:%M:%S"),
        event.to_status
    )
}

/// Print and verify the ledger of one return.
///
/// # Errors
///
/// Returns an error if the return is unknown, its ledger is malformed, or
/// the ledger disagrees with the stored status.
pub async fn run(id: i32) -> Result<(), TimelineError> {
    let id = ReturnRequestId::new(id);
    let pool = connect().await?;
    let store = PgReturnStore::new(pool);

    let request = store
        .get_return(id)
        .await?
        .ok_or(TimelineError::NotFound(id))?;
    let history: Vec<StatusHistoryEvent> = store.history(id).try_collect().await?;

    info!(return_number = %request.return_number, rows = history.len(), "Status history");
    for event in &history {
        info!("  {}", format_event(event));
    }

    let replayed = replay(history.iter().map(LedgerEntry::from))?;
    if replayed != request.status {
        warn!(%replayed, stored = %request.status, "Ledger and status disagree");
        return Err(TimelineError::Mismatch {
            replayed: replayed.to_string(),
            stored: request.status.to_string(),
        });
    }

    info!(status = %replayed, "Ledger replays cleanly");
    Ok(())
}
