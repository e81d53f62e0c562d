//! Returns Core - Shared types library.
//!
//! This crate provides the types used across all return-engine components:
//! - `server` - HTTP API and lifecycle engine for store admins and order confirmers
//! - `cli` - Command-line tools for migrations, seeding and audit
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Everything that decides *whether* a return may
//! move, and *how much* is owed, lives here so it can be tested in isolation.
//!
//! # Modules
//!
//! - [`types`] - IDs, money, statuses, the transition table, settlement math,
//!   return numbers and ledger replay

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
