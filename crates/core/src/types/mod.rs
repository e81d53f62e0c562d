//! Core types for the return lifecycle.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod ledger;
pub mod money;
pub mod return_number;
pub mod settlement;
pub mod status;

pub use id::*;
pub use ledger::{LedgerEntry, ReplayError, replay};
pub use money::Money;
pub use return_number::{ReturnNumber, ReturnNumberError};
pub use settlement::{Settlement, SettlementLine};
pub use status::*;
