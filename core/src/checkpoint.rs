//! Checkpoint persistence for workflow runs.
//!
//! Snapshots are whole-state JSON documents keyed by run id. The
//! runner saves after every node transition, so a crashed or suspended
//! run resumes from the last completed node.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;

use crate::errors::CheckpointResult;
use crate::state::WorkflowState;

/// Durable storage for workflow state snapshots.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist the full state, replacing any existing snapshot for
    /// the same run id.
    async fn save(&self, state: &WorkflowState) -> CheckpointResult<()>;

    /// Load the latest snapshot for a run, if any.
    async fn load(&self, run_id: i64) -> CheckpointResult<Option<WorkflowState>>;

    /// Remove a run's snapshot.
    async fn delete(&self, run_id: i64) -> CheckpointResult<()>;

    /// All run ids with a stored snapshot.
    async fn list_runs(&self) -> CheckpointResult<Vec<i64>>;
}

/// In-process checkpointer for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryCheckpointer {
    snapshots: Arc<RwLock<HashMap<i64, serde_json::Value>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, state: &WorkflowState) -> CheckpointResult<()> {
        let snapshot = state.to_snapshot()?;
        self.snapshots.write().await.insert(state.run_id, snapshot);
        Ok(())
    }

    async fn load(&self, run_id: i64) -> CheckpointResult<Option<WorkflowState>> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(&run_id) {
            Some(snapshot) => Ok(Some(WorkflowState::from_snapshot(snapshot.clone())?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, run_id: i64) -> CheckpointResult<()> {
        self.snapshots.write().await.remove(&run_id);
        Ok(())
    }

    async fn list_runs(&self) -> CheckpointResult<Vec<i64>> {
        let mut ids: Vec<i64> = self.snapshots.read().await.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// SQLite-backed checkpointer for real runs.
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Open (creating if needed) the database at `path` and ensure
    /// the checkpoint table exists.
    pub async fn new(path: &str) -> CheckpointResult<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> CheckpointResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                run_id INTEGER PRIMARY KEY,
                snapshot TEXT NOT NULL,
                current_stage TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, state: &WorkflowState) -> CheckpointResult<()> {
        let snapshot = serde_json::to_string(&state.to_snapshot()?)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (run_id, snapshot, current_stage, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(run_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                current_stage = excluded.current_stage,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.run_id)
        .bind(&snapshot)
        .bind(state.current_stage.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, run_id: i64) -> CheckpointResult<Option<WorkflowState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT snapshot FROM workflow_checkpoints WHERE run_id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((snapshot,)) => {
                let value: serde_json::Value = serde_json::from_str(&snapshot)?;
                Ok(Some(WorkflowState::from_snapshot(value)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, run_id: i64) -> CheckpointResult<()> {
        sqlx::query("DELETE FROM workflow_checkpoints WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_runs(&self) -> CheckpointResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT run_id FROM workflow_checkpoints ORDER BY run_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowStage;

    #[tokio::test]
    async fn test_memory_save_load_round_trip() {
        let store = MemoryCheckpointer::new();
        let mut state = WorkflowState::initial(42, 1, 1, "Build a blog API", None, 3);
        state.current_stage = WorkflowStage::EpicGeneration;

        store.save(&state).await.unwrap();
        let loaded = store.load(42).await.unwrap().unwrap();
        assert_eq!(loaded.run_id, 42);
        assert_eq!(loaded.current_stage, WorkflowStage::EpicGeneration);
        assert_eq!(loaded.product_request, "Build a blog API");
    }

    #[tokio::test]
    async fn test_memory_load_missing_run() {
        let store = MemoryCheckpointer::new();
        assert!(store.load(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_save_overwrites() {
        let store = MemoryCheckpointer::new();
        let mut state = WorkflowState::initial(1, 1, 1, "x", None, 3);
        store.save(&state).await.unwrap();

        state.current_stage = WorkflowStage::Completed;
        store.save(&state).await.unwrap();

        let loaded = store.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.current_stage, WorkflowStage::Completed);
        assert_eq!(store.list_runs().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryCheckpointer::new();
        let state = WorkflowState::initial(5, 1, 1, "x", None, 3);
        store.save(&state).await.unwrap();
        store.delete(5).await.unwrap();
        assert!(store.load(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let store = SqliteCheckpointer::new(path.to_str().unwrap()).await.unwrap();

        let mut state = WorkflowState::initial(7, 2, 3, "Inventory service", None, 3);
        state.current_stage = WorkflowStage::StoryReview;
        state.awaiting_approval = true;
        store.save(&state).await.unwrap();

        let loaded = store.load(7).await.unwrap().unwrap();
        assert_eq!(loaded.current_stage, WorkflowStage::StoryReview);
        assert!(loaded.awaiting_approval);

        // Reopen the same file and confirm the snapshot survived.
        drop(store);
        let reopened = SqliteCheckpointer::new(path.to_str().unwrap()).await.unwrap();
        let loaded = reopened.load(7).await.unwrap().unwrap();
        assert_eq!(loaded.run_id, 7);
        assert_eq!(reopened.list_runs().await.unwrap(), vec![7]);
    }
}
