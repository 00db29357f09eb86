//! Domain models shared across stores, agents, and the HTTP adapter.

pub mod chat;
pub mod step;
pub mod usage;
pub mod workflow;

pub use chat::{Attachment, ChatRequest, HistoryTurn, RunMode};
pub use step::{StepPatch, StepRecord};
pub use usage::{SpendCheck, SpendingLimit, UsageRecord};
pub use workflow::{StepNode, Workflow};
