//! Attest Core — transport-agnostic domain logic for the Attest platform.
//!
//! This crate contains the workflow-graph scheduler, the per-user step
//! ledger, the spend governor, and the streaming agent layer. It has
//! **no HTTP framework dependency** by default, making it suitable for use
//! in:
//!
//! - HTTP servers (via `attest-server`)
//! - CLI tools
//! - Embedded test harnesses
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod agent;
pub mod db;
pub mod error;
pub mod graph;
pub mod models;
pub mod state;
pub mod store;
pub mod usage;

// Convenience re-exports
pub use db::Database;
pub use error::ServerError;
pub use state::{AppState, AppStateInner};
