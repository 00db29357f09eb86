//! Persistence stores backed by the SQLite `Database` handle.

mod step_store;
mod workflow_store;

pub use step_store::StepStore;
pub use workflow_store::WorkflowStore;
