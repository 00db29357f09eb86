use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::ServerError;
use crate::graph::Edge;
use crate::models::{StepNode, Workflow};

pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, workflow: &Workflow) -> Result<(), ServerError> {
        let w = workflow.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, user_id, name, slug, description, nodes, edges, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                       name = excluded.name,
                       slug = excluded.slug,
                       description = excluded.description,
                       nodes = excluded.nodes,
                       edges = excluded.edges,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        w.id,
                        w.user_id,
                        w.name,
                        w.slug,
                        w.description,
                        serde_json::to_string(&w.nodes).unwrap_or_else(|_| "[]".to_string()),
                        serde_json::to_string(&w.edges).unwrap_or_else(|_| "[]".to_string()),
                        w.created_at.timestamp_millis(),
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, workflow_id: &str, user_id: &str) -> Result<Option<Workflow>, ServerError> {
        let wid = workflow_id.to_string();
        let uid = user_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, slug, description, nodes, edges, created_at, updated_at
                     FROM workflows WHERE id = ?1 AND user_id = ?2",
                )?;
                stmt.query_row(rusqlite::params![wid, uid], |row| Ok(row_to_workflow(row)))
                    .optional()
            })
            .await
    }

    pub async fn get_by_slug(&self, slug: &str, user_id: &str) -> Result<Option<Workflow>, ServerError> {
        let slug = slug.to_string();
        let uid = user_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, slug, description, nodes, edges, created_at, updated_at
                     FROM workflows WHERE slug = ?1 AND user_id = ?2",
                )?;
                stmt.query_row(rusqlite::params![slug, uid], |row| Ok(row_to_workflow(row)))
                    .optional()
            })
            .await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Workflow>, ServerError> {
        let uid = user_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, slug, description, nodes, edges, created_at, updated_at
                     FROM workflows WHERE user_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![uid], |row| Ok(row_to_workflow(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Delete a workflow. Ledger entries cascade via the foreign key.
    pub async fn delete(&self, workflow_id: &str, user_id: &str) -> Result<(), ServerError> {
        let wid = workflow_id.to_string();
        let uid = user_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "DELETE FROM workflows WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![wid, uid],
                )?;
                Ok(())
            })
            .await
    }
}

use rusqlite::Row;

/// Convert a database row to a Workflow.
/// Column order: id(0), user_id(1), name(2), slug(3), description(4),
///               nodes(5), edges(6), created_at(7), updated_at(8)
fn row_to_workflow(row: &Row<'_>) -> Workflow {
    let created_ms: i64 = row.get(7).unwrap_or(0);
    let updated_ms: i64 = row.get(8).unwrap_or(0);

    let nodes: Vec<StepNode> = row
        .get::<_, String>(5)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let edges: Vec<Edge> = row
        .get::<_, String>(6)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Workflow {
        id: row.get(0).unwrap_or_default(),
        user_id: row.get(1).unwrap_or_default(),
        name: row.get(2).unwrap_or_default(),
        slug: row.get(3).unwrap_or_default(),
        description: row.get(4).unwrap_or(None),
        nodes,
        edges,
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WorkflowStore {
        WorkflowStore::new(Database::open_in_memory().unwrap())
    }

    fn sample(user: &str) -> Workflow {
        let mut w = Workflow::new(user, "Revenue Audit", "revenue-audit");
        w.nodes = vec![
            StepNode::with_instructions("plan", "Draft the audit plan"),
            StepNode::new("fieldwork"),
            StepNode::new("report"),
        ];
        w.edges = vec![Edge::new("plan", "fieldwork"), Edge::new("fieldwork", "report")];
        w
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let store = store();
        let w = sample("u1");
        store.save(&w).await.unwrap();

        let got = store.get(&w.id, "u1").await.unwrap().unwrap();
        assert_eq!(got.name, "Revenue Audit");
        assert_eq!(got.nodes.len(), 3);
        assert_eq!(got.edges.len(), 2);

        // Scoped to the owning user.
        assert!(store.get(&w.id, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_slug() {
        let store = store();
        let w = sample("u1");
        store.save(&w).await.unwrap();

        let got = store.get_by_slug("revenue-audit", "u1").await.unwrap().unwrap();
        assert_eq!(got.id, w.id);
        assert!(store.get_by_slug("missing", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = store();
        let mut w = sample("u1");
        store.save(&w).await.unwrap();

        w.nodes.push(StepNode::new("followup"));
        store.save(&w).await.unwrap();

        let all = store.list_for_user("u1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].nodes.len(), 4);
    }
}
