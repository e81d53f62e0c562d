//! Status history replay.
//!
//! The status history of a return is append-only. Replaying it from the seed
//! row must land on the aggregate's current status; anything else means the
//! ledger and the aggregate have diverged.

use super::status::ReturnStatus;

/// The part of a status history row that matters for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Status before the transition (`None` only for the seed row).
    pub from_status: Option<ReturnStatus>,
    /// Status after the transition.
    pub to_status: ReturnStatus,
}

/// Why a ledger could not be replayed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// No rows at all.
    #[error("status history is empty")]
    Empty,
    /// The first row is not `∅ -> requested`.
    #[error("status history must start with a seed row into requested")]
    InvalidSeed,
    /// A row's `from` does not match the previous row's `to`.
    #[error("row {position}: expected transition from {expected}, found {found:?}")]
    Discontinuous {
        /// Zero-based row index.
        position: usize,
        /// Status the previous row ended in.
        expected: ReturnStatus,
        /// Status this row claims to start from.
        found: Option<ReturnStatus>,
    },
    /// A row records an edge the transition table does not allow.
    #[error("row {position}: illegal transition {from} -> {to}")]
    IllegalEdge {
        /// Zero-based row index.
        position: usize,
        /// Source status.
        from: ReturnStatus,
        /// Target status.
        to: ReturnStatus,
    },
}

/// Replay a chronological status history and return the status it ends in.
///
/// # Errors
///
/// Returns an error if the history is empty, does not start with a seed row,
/// breaks continuity, or contains an edge outside the transition table.
///
/// # Examples
///
/// ```
/// use returns_core::{LedgerEntry, ReturnStatus, replay};
///
/// let history = [
///     LedgerEntry { from_status: None, to_status: ReturnStatus::Requested },
///     LedgerEntry { from_status: Some(ReturnStatus::Requested), to_status: ReturnStatus::Approved },
/// ];
/// assert_eq!(replay(history), Ok(ReturnStatus::Approved));
/// ```
pub fn replay(
    entries: impl IntoIterator<Item = LedgerEntry>,
) -> Result<ReturnStatus, ReplayError> {
    let mut entries = entries.into_iter();

    let seed = entries.next().ok_or(ReplayError::Empty)?;
    if seed.from_status.is_some() || seed.to_status != ReturnStatus::Requested {
        return Err(ReplayError::InvalidSeed);
    }

    let mut current = seed.to_status;
    for (offset, entry) in entries.enumerate() {
        let position = offset + 1;
        if entry.from_status != Some(current) {
            return Err(ReplayError::Discontinuous {
                position,
                expected: current,
                found: entry.from_status,
            });
        }
        if !current.can_transition_to(entry.to_status) {
            return Err(ReplayError::IllegalEdge {
                position,
                from: current,
                to: entry.to_status,
            });
        }
        current = entry.to_status;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReturnStatus::{Approved, Completed, Received, Requested};

    const fn entry(from: Option<ReturnStatus>, to: ReturnStatus) -> LedgerEntry {
        LedgerEntry {
            from_status: from,
            to_status: to,
        }
    }

    #[test]
    fn test_replay_full_happy_path() {
        let history = [
            entry(None, Requested),
            entry(Some(Requested), Approved),
            entry(Some(Approved), Received),
            entry(Some(Received), Completed),
        ];
        assert_eq!(replay(history), Ok(Completed));
    }

    #[test]
    fn test_replay_seed_only() {
        assert_eq!(replay([entry(None, Requested)]), Ok(Requested));
    }

    #[test]
    fn test_replay_empty() {
        assert_eq!(replay([]), Err(ReplayError::Empty));
    }

    #[test]
    fn test_replay_bad_seed() {
        assert_eq!(
            replay([entry(None, Approved)]),
            Err(ReplayError::InvalidSeed)
        );
        assert_eq!(
            replay([entry(Some(Requested), Requested)]),
            Err(ReplayError::InvalidSeed)
        );
    }

    #[test]
    fn test_replay_discontinuity() {
        let history = [
            entry(None, Requested),
            entry(Some(Approved), Received),
        ];
        assert_eq!(
            replay(history),
            Err(ReplayError::Discontinuous {
                position: 1,
                expected: Requested,
                found: Some(Approved),
            })
        );
    }

    #[test]
    fn test_replay_illegal_edge() {
        let history = [entry(None, Requested), entry(Some(Requested), Completed)];
        assert_eq!(
            replay(history),
            Err(ReplayError::IllegalEdge {
                position: 1,
                from: Requested,
                to: Completed,
            })
        );
    }
}
