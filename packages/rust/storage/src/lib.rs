//! libSQL run registry and checkpoint store.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! pipeline run plus a full [`RunState`] snapshot after every committed
//! phase. The CLI is the sole writer; `battlecard list` reads the registry.

mod migrations;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use battlecard_engine::CheckpointSink;
use battlecard_shared::{BattleCardError, Phase, Result, RunId, RunState, RunStatus};
use chrono::Utc;
use libsql::{Connection, Database, params};

/// One row of the run registry.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub id: String,
    pub company: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub artifact_path: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BattleCardError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BattleCardError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Run registry
    // -----------------------------------------------------------------------

    /// Register a run when it starts. Status begins as "running".
    pub async fn register_run(&self, run_id: &RunId, state: &RunState) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs (id, company, status, started_at)
                 VALUES (?1, ?2, 'running', ?3)",
                params![
                    run_id.to_string(),
                    state.company_name.as_str(),
                    state.started_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record a run's terminal status and summary counts.
    pub async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        state: &RunState,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET
                   status = ?1,
                   finished_at = ?2,
                   artifact_path = ?3,
                   competitors = ?4,
                   pricing_plans = ?5,
                   news_items = ?6,
                   errors = ?7
                 WHERE id = ?8",
                params![
                    status.as_str(),
                    now.as_str(),
                    state.artifact_path.as_deref(),
                    state.competitors.len() as i64,
                    state
                        .pricing_record
                        .as_ref()
                        .map(|r| r.len() as i64)
                        .unwrap_or(0),
                    state.news_items.len() as i64,
                    state.errors.len() as i64,
                    run_id.to_string(),
                ],
            )
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List registered runs, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company, status, started_at, finished_at, artifact_path
                 FROM runs ORDER BY started_at DESC",
                params![],
            )
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunSummary {
                id: row
                    .get::<String>(0)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?,
                company: row
                    .get::<String>(1)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?,
                status: row
                    .get::<String>(2)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(3)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(4).ok(),
                artifact_path: row.get::<String>(5).ok(),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Store a full state snapshot after a committed phase.
    pub async fn record_checkpoint(
        &self,
        run_id: &RunId,
        phase: Phase,
        state: &RunState,
    ) -> Result<()> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| BattleCardError::Storage(format!("serialize checkpoint: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO checkpoints (run_id, phase, state_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    run_id.to_string(),
                    phase.as_str(),
                    state_json.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Latest checkpoint for a run, if any.
    pub async fn latest_checkpoint(&self, run_id: &RunId) -> Result<Option<(String, RunState)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT phase, state_json FROM checkpoints
                 WHERE run_id = ?1 ORDER BY id DESC LIMIT 1",
                params![run_id.to_string()],
            )
            .await
            .map_err(|e| BattleCardError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let phase: String = row
                    .get(0)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?;
                let json: String = row
                    .get(1)
                    .map_err(|e| BattleCardError::Storage(e.to_string()))?;
                let state: RunState = serde_json::from_str(&json)
                    .map_err(|e| BattleCardError::Storage(format!("corrupt checkpoint: {e}")))?;
                Ok(Some((phase, state)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(BattleCardError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckpointSink
// ---------------------------------------------------------------------------

/// Adapter giving the engine a durable checkpoint target for one run.
pub struct RunCheckpointer {
    storage: Arc<Storage>,
    run_id: RunId,
}

impl RunCheckpointer {
    pub fn new(storage: Arc<Storage>, run_id: RunId) -> Self {
        Self { storage, run_id }
    }
}

#[async_trait]
impl CheckpointSink for RunCheckpointer {
    async fn checkpoint(&self, state: &RunState, committed: Phase) -> Result<()> {
        self.storage
            .record_checkpoint(&self.run_id, committed, state)
            .await
    }
}
