//! Returns server library.
//!
//! This crate provides the return/refund lifecycle service as a library,
//! allowing it to be tested and reused by the CLI.
//!
//! # Layers
//!
//! - [`db`] - Store traits with `PostgreSQL` and in-memory implementations
//! - [`services`] - Lifecycle engine and post-commit notifications
//! - [`routes`] - JSON HTTP API
//!
//! Only deploy on the internal network; the API carries no authentication
//! of its own and expects role gating upstream.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod slack;
pub mod state;

use axum::Router;

use state::AppState;

/// Build the application router with its state attached.
///
/// Tracing and Sentry layers are added by the binary.
pub fn app(state: AppState) -> Router {
    routes::routes().with_state(state)
}
