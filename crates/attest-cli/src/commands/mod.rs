//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the attest-core domain logic through `AppState`.

pub mod limit;
pub mod server;
pub mod workflow;

use std::sync::Arc;

use attest_core::agent::{ModelClient, ScriptedModel};
use attest_core::state::AppState;

/// Initialize a shared `AppState` from the given SQLite database path.
///
/// Offline commands never call the model, so the scripted backend stands
/// in; only the `server` subcommand wires up the hosted client.
pub async fn init_state(db_path: &str) -> AppState {
    let db = attest_core::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });

    Arc::new(attest_core::AppStateInner::new(
        db,
        ModelClient::Scripted(ScriptedModel::new()),
    ))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
