//! Shared application state for the axum server.

use std::sync::Arc;

use crate::agent::ModelClient;
use crate::db::Database;
use crate::store::{StepStore, WorkflowStore};
use crate::usage::UsageGovernor;

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub db: Database,
    pub workflow_store: WorkflowStore,
    pub step_store: StepStore,
    pub usage_governor: UsageGovernor,
    pub model: ModelClient,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(db: Database, model: ModelClient) -> Self {
        Self {
            workflow_store: WorkflowStore::new(db.clone()),
            step_store: StepStore::new(db.clone()),
            usage_governor: UsageGovernor::new(db.clone()),
            model,
            db,
        }
    }
}
