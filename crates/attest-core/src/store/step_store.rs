//! The step ledger — per-(user, workflow, node) completion records.
//!
//! Written by two actors: a human explicitly saving/approving a step, and
//! the copilot auto-marking completion in auto-advance runs. What counts as
//! "available next" is defined by the graph scheduler over `completed_set`.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::{StepPatch, StepRecord};

pub struct StepStore {
    db: Database,
}

impl StepStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        user_id: &str,
        workflow_id: &str,
        node_id: &str,
    ) -> Result<Option<StepRecord>, ServerError> {
        let uid = user_id.to_string();
        let wid = workflow_id.to_string();
        let nid = node_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, workflow_id, node_id, result, completed, completed_at, created_at, updated_at
                     FROM workflow_steps WHERE user_id = ?1 AND workflow_id = ?2 AND node_id = ?3",
                )?;
                stmt.query_row(rusqlite::params![uid, wid, nid], |row| Ok(row_to_step(row)))
                    .optional()
            })
            .await
    }

    /// Create-or-update one ledger row. `completed=true` stamps
    /// `completed_at`; flipping back to false clears it. Absent patch
    /// fields keep the stored value.
    ///
    /// A failure here must reach the caller — an approval that did not
    /// stick is the one persistence error that is never swallowed.
    pub async fn upsert(
        &self,
        user_id: &str,
        workflow_id: &str,
        node_id: &str,
        patch: StepPatch,
    ) -> Result<StepRecord, ServerError> {
        let uid = user_id.to_string();
        let wid = workflow_id.to_string();
        let nid = node_id.to_string();
        let now_ms = Utc::now().timestamp_millis();

        self.db
            .with_conn_async(move |conn| {
                let existing = conn
                    .prepare(
                        "SELECT result, completed, completed_at FROM workflow_steps
                         WHERE user_id = ?1 AND workflow_id = ?2 AND node_id = ?3",
                    )?
                    .query_row(rusqlite::params![uid, wid, nid], |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, i64>(1)? != 0,
                            row.get::<_, Option<i64>>(2)?,
                        ))
                    })
                    .optional()?;

                let (prev_result, prev_completed, prev_completed_at) =
                    existing.unwrap_or((None, false, None));
                let result = patch.result.or(prev_result);
                let completed = patch.completed.unwrap_or(prev_completed);
                let completed_at = if completed {
                    // Keep the original stamp if the step was already completed.
                    prev_completed_at.filter(|_| prev_completed).or(Some(now_ms))
                } else {
                    None
                };

                conn.execute(
                    "INSERT INTO workflow_steps
                       (user_id, workflow_id, node_id, result, completed, completed_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                     ON CONFLICT(user_id, workflow_id, node_id) DO UPDATE SET
                       result = excluded.result,
                       completed = excluded.completed,
                       completed_at = excluded.completed_at,
                       updated_at = excluded.updated_at",
                    rusqlite::params![uid, wid, nid, result, completed as i64, completed_at, now_ms],
                )?;

                let mut stmt = conn.prepare(
                    "SELECT user_id, workflow_id, node_id, result, completed, completed_at, created_at, updated_at
                     FROM workflow_steps WHERE user_id = ?1 AND workflow_id = ?2 AND node_id = ?3",
                )?;
                stmt.query_row(rusqlite::params![uid, wid, nid], |row| Ok(row_to_step(row)))
            })
            .await
    }

    pub async fn list_for_workflow(
        &self,
        user_id: &str,
        workflow_id: &str,
    ) -> Result<Vec<StepRecord>, ServerError> {
        let uid = user_id.to_string();
        let wid = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, workflow_id, node_id, result, completed, completed_at, created_at, updated_at
                     FROM workflow_steps WHERE user_id = ?1 AND workflow_id = ?2 ORDER BY created_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![uid, wid], |row| Ok(row_to_step(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// The completion set the frontier computation runs over.
    pub async fn completed_set(
        &self,
        user_id: &str,
        workflow_id: &str,
    ) -> Result<HashSet<String>, ServerError> {
        let uid = user_id.to_string();
        let wid = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT node_id FROM workflow_steps
                     WHERE user_id = ?1 AND workflow_id = ?2 AND completed = 1",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![uid, wid], |row| row.get::<_, String>(0))?
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Whole-percent progress; a workflow with no nodes is 0%, not a
    /// division error.
    pub fn progress(completed_count: usize, total_node_count: usize) -> u8 {
        if total_node_count == 0 {
            return 0;
        }
        ((100.0 * completed_count as f64 / total_node_count as f64).round()) as u8
    }
}

use rusqlite::Row;

/// Column order: user_id(0), workflow_id(1), node_id(2), result(3),
///               completed(4), completed_at(5), created_at(6), updated_at(7)
fn row_to_step(row: &Row<'_>) -> StepRecord {
    let created_ms: i64 = row.get(6).unwrap_or(0);
    let updated_ms: i64 = row.get(7).unwrap_or(0);

    StepRecord {
        user_id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        node_id: row.get(2).unwrap_or_default(),
        result: row.get(3).unwrap_or(None),
        completed: row.get::<_, i64>(4).unwrap_or(0) != 0,
        completed_at: row
            .get::<_, Option<i64>>(5)
            .unwrap_or(None)
            .and_then(chrono::DateTime::from_timestamp_millis),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StepNode, Workflow};
    use crate::store::WorkflowStore;

    async fn stores() -> (WorkflowStore, StepStore, Workflow) {
        let db = Database::open_in_memory().unwrap();
        let workflows = WorkflowStore::new(db.clone());
        let steps = StepStore::new(db);

        let mut w = Workflow::new("u1", "Inventory Audit", "inventory-audit");
        w.nodes = ["a", "b", "c", "d"].iter().map(|n| StepNode::new(*n)).collect();
        workflows.save(&w).await.unwrap();
        (workflows, steps, w)
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let (_, steps, w) = stores().await;

        let rec = steps
            .upsert("u1", &w.id, "a", StepPatch::result("draft text"))
            .await
            .unwrap();
        assert_eq!(rec.result.as_deref(), Some("draft text"));
        assert!(!rec.completed);
        assert!(rec.completed_at.is_none());

        // Approving keeps the result and stamps completed_at.
        let rec = steps
            .upsert("u1", &w.id, "a", StepPatch::completed(true))
            .await
            .unwrap();
        assert_eq!(rec.result.as_deref(), Some("draft text"));
        assert!(rec.completed);
        assert!(rec.completed_at.is_some());

        // Un-completing clears the stamp.
        let rec = steps
            .upsert("u1", &w.id, "a", StepPatch::completed(false))
            .await
            .unwrap();
        assert!(!rec.completed);
        assert!(rec.completed_at.is_none());

        // Still exactly one row per (user, workflow, node).
        assert_eq!(steps.list_for_workflow("u1", &w.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_set() {
        let (_, steps, w) = stores().await;
        steps.upsert("u1", &w.id, "a", StepPatch::approve("done a")).await.unwrap();
        steps.upsert("u1", &w.id, "b", StepPatch::result("pending b")).await.unwrap();

        let set = steps.completed_set("u1", &w.id).await.unwrap();
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
        assert_eq!(set.len(), 1);

        // Other users see an empty ledger.
        assert!(steps.completed_set("u2", &w.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_delete_with_workflow() {
        let (workflows, steps, w) = stores().await;
        steps.upsert("u1", &w.id, "a", StepPatch::approve("done")).await.unwrap();

        workflows.delete(&w.id, "u1").await.unwrap();
        assert!(steps.list_for_workflow("u1", &w.id).await.unwrap().is_empty());
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(StepStore::progress(1, 4), 25);
        assert_eq!(StepStore::progress(0, 0), 0);
        assert_eq!(StepStore::progress(2, 3), 67);
        assert_eq!(StepStore::progress(4, 4), 100);
    }
}
