//! The State Store (C1): durable, transactional persistence for every
//! entity in the data model, with versioned migrations and an online
//! backup/restore facility.

mod schema;

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use geoffrussy_common::*;
use libsql::params;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub use schema::MIGRATIONS;

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Store {
    conn: Mutex<libsql::Connection>,
    path: Option<PathBuf>,
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> Result<Timestamp> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Other(anyhow::anyhow!("bad timestamp {s}: {e}")))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<Timestamp>> {
    s.map(|s| parse_ts(&s)).transpose()
}

impl Store {
    /// Open (or create) the store at `path`, enforcing foreign keys and a
    /// write-ahead journal, then run every pending migration.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = libsql::Builder::new_local(&path)
            .build()
            .await
            .map_err(StoreError::Database)?;
        let conn = db.connect().map_err(StoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.init().await?;
        Ok(store)
    }

    /// In-memory store, primarily for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(StoreError::Database)?;
        let conn = db.connect().map_err(StoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .await
            .map_err(StoreError::Database)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );",
        )
        .await
        .map_err(StoreError::Database)?;
        drop(conn);
        self.migrate().await
    }

    // ---- migrations -----------------------------------------------------

    pub async fn current_version(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", ())
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?;
        match row {
            Some(row) => row.get::<i64>(0).map_err(StoreError::Database),
            None => Ok(0),
        }
    }

    /// Apply every migration with `version > current`, in ascending order,
    /// each recorded on success. Re-running with nothing pending is a no-op.
    pub async fn migrate(&self) -> Result<()> {
        let current = self.current_version().await?;
        let conn = self.conn.lock().await;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            conn.execute_batch(migration.up)
                .await
                .map_err(StoreError::Database)?;
            conn.execute(
                "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.description, now_str()],
            )
            .await
            .map_err(StoreError::Database)?;
            debug!(version = migration.version, "applied migration");
        }
        Ok(())
    }

    /// Roll back the single most-recently-applied migration.
    pub async fn rollback(&self) -> Result<()> {
        let current = self.current_version().await?;
        let Some(migration) = MIGRATIONS.iter().find(|m| m.version == current) else {
            return Ok(());
        };
        let conn = self.conn.lock().await;
        conn.execute_batch(migration.down)
            .await
            .map_err(StoreError::Database)?;
        conn.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            params![migration.version],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    /// Migrate up or down until `current_version() == n`.
    pub async fn migrate_to_version(&self, n: i64) -> Result<()> {
        loop {
            let current = self.current_version().await?;
            if current == n {
                return Ok(());
            }
            if current < n {
                let next = self.current_version().await? + 1;
                let Some(migration) = MIGRATIONS.iter().find(|m| m.version == next) else {
                    return Ok(());
                };
                let conn = self.conn.lock().await;
                conn.execute_batch(migration.up)
                    .await
                    .map_err(StoreError::Database)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                    params![migration.version, migration.description, now_str()],
                )
                .await
                .map_err(StoreError::Database)?;
            } else {
                self.rollback().await?;
            }
        }
    }

    // ---- backup / restore / health ---------------------------------------

    /// Consistent online copy of the database file to `path`.
    pub async fn backup(&self, path: impl AsRef<Path>) -> Result<()> {
        let Some(source) = &self.path else {
            return Err(StoreError::Other(anyhow::anyhow!(
                "cannot back up an in-memory store"
            )));
        };
        let conn = self.conn.lock().await;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .await
            .map_err(StoreError::Database)?;
        drop(conn);
        std::fs::copy(source, path.as_ref())?;
        Ok(())
    }

    /// Replace the current database file contents with `path`, then
    /// reconnect. Per §4.1, rows inserted after the backup whose primary
    /// keys don't collide with the restored snapshot remain visible: we
    /// merge rather than overwrite by re-attaching the live file as a
    /// secondary database and copying forward any row whose primary key is
    /// absent from the restored snapshot, table by table.
    pub async fn restore(&self, path: impl AsRef<Path>) -> Result<()> {
        let Some(dest) = &self.path else {
            return Err(StoreError::Other(anyhow::anyhow!(
                "cannot restore into an in-memory store"
            )));
        };
        let live_copy = dest.with_extension("pre-restore.db");
        std::fs::copy(dest, &live_copy)?;

        std::fs::copy(path.as_ref(), dest)?;

        let conn = self.conn.lock().await;
        conn.execute("ATTACH DATABASE ?1 AS pre_restore", params![live_copy.to_string_lossy().to_string()])
            .await
            .map_err(StoreError::Database)?;

        const MERGE_BACK_TABLES: &[&str] = &[
            "projects", "interview_data", "architectures", "phases", "tasks",
            "checkpoints", "blockers", "detours", "config",
            "token_usage", "rate_limit_info", "quota_info", "token_stats_cache",
        ];
        for table in MERGE_BACK_TABLES {
            let sql = format!("INSERT OR IGNORE INTO {table} SELECT * FROM pre_restore.{table}");
            conn.execute(&sql, ()).await.map_err(StoreError::Database)?;
        }
        conn.execute("DETACH DATABASE pre_restore", ())
            .await
            .map_err(StoreError::Database)?;
        drop(conn);
        let _ = std::fs::remove_file(&live_copy);
        Ok(())
    }

    /// Simple query plus `schema_version > 0`; fails on a closed or
    /// corrupted file rather than silently recovering.
    pub async fn health_check(&self) -> Result<()> {
        let version = self.current_version().await?;
        if version == 0 {
            return Err(StoreError::Other(anyhow::anyhow!("schema not initialized")));
        }
        let conn = self.conn.lock().await;
        conn.query("SELECT 1", ()).await.map_err(StoreError::Database)?;
        Ok(())
    }

    // ---- projects ---------------------------------------------------------

    pub async fn save_project(&self, p: &Project) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO projects (id, name, created_at, current_stage, current_phase_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                current_stage = excluded.current_stage,
                current_phase_id = excluded.current_phase_id",
            params![
                p.id.clone(),
                p.name.clone(),
                p.created_at.to_rfc3339(),
                stage_to_str(p.current_stage),
                p.current_phase_id.clone()
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, name, created_at, current_stage, current_phase_id FROM projects WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "project", id: id.to_string() }
        })?;
        Ok(Project {
            id: row.get::<String>(0).map_err(StoreError::Database)?,
            name: row.get::<String>(1).map_err(StoreError::Database)?,
            created_at: parse_ts(&row.get::<String>(2).map_err(StoreError::Database)?)?,
            current_stage: stage_from_str(&row.get::<String>(3).map_err(StoreError::Database)?)?,
            current_phase_id: row.get::<Option<String>>(4).map_err(StoreError::Database)?,
        })
    }

    pub async fn delete_project(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM projects WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(StoreError::Database)?;
        Ok(())
    }

    // ---- interview data -----------------------------------------------------

    pub async fn save_interview_data(&self, d: &InterviewData) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO interview_data (
                project_id, project_name, created_at, problem_statement, target_users,
                success_metrics, technical_stack, integrations, scope, constraints,
                assumptions, unknowns, refinement_history, raw_session
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(project_id) DO UPDATE SET
                project_name = excluded.project_name,
                problem_statement = excluded.problem_statement,
                target_users = excluded.target_users,
                success_metrics = excluded.success_metrics,
                technical_stack = excluded.technical_stack,
                integrations = excluded.integrations,
                scope = excluded.scope,
                constraints = excluded.constraints,
                assumptions = excluded.assumptions,
                unknowns = excluded.unknowns,
                refinement_history = excluded.refinement_history,
                raw_session = excluded.raw_session",
            params![
                d.project_id.clone(),
                d.project_name.clone(),
                d.created_at.to_rfc3339(),
                d.problem_statement.clone(),
                serde_json::to_string(&d.target_users).unwrap(),
                serde_json::to_string(&d.success_metrics).unwrap(),
                serde_json::to_string(&d.technical_stack).unwrap(),
                serde_json::to_string(&d.integrations).unwrap(),
                serde_json::to_string(&d.scope).unwrap(),
                serde_json::to_string(&d.constraints).unwrap(),
                serde_json::to_string(&d.assumptions).unwrap(),
                serde_json::to_string(&d.unknowns).unwrap(),
                serde_json::to_string(&d.refinement_history).unwrap(),
                d.raw_session.clone(),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_interview_data(&self, project_id: &str) -> Result<InterviewData> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT project_id, project_name, created_at, problem_statement, target_users,
                        success_metrics, technical_stack, integrations, scope, constraints,
                        assumptions, unknowns, refinement_history, raw_session
                 FROM interview_data WHERE project_id = ?1",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "interview_data", id: project_id.to_string() }
        })?;
        Ok(InterviewData {
            project_id: row.get::<String>(0).map_err(StoreError::Database)?,
            project_name: row.get::<String>(1).map_err(StoreError::Database)?,
            created_at: parse_ts(&row.get::<String>(2).map_err(StoreError::Database)?)?,
            problem_statement: row.get::<String>(3).map_err(StoreError::Database)?,
            target_users: serde_json::from_str(&row.get::<String>(4).map_err(StoreError::Database)?).unwrap_or_default(),
            success_metrics: serde_json::from_str(&row.get::<String>(5).map_err(StoreError::Database)?).unwrap_or_default(),
            technical_stack: serde_json::from_str(&row.get::<String>(6).map_err(StoreError::Database)?).unwrap_or_default(),
            integrations: serde_json::from_str(&row.get::<String>(7).map_err(StoreError::Database)?).unwrap_or_default(),
            scope: serde_json::from_str(&row.get::<String>(8).map_err(StoreError::Database)?).unwrap_or_default(),
            constraints: serde_json::from_str(&row.get::<String>(9).map_err(StoreError::Database)?).unwrap_or_default(),
            assumptions: serde_json::from_str(&row.get::<String>(10).map_err(StoreError::Database)?).unwrap_or_default(),
            unknowns: serde_json::from_str(&row.get::<String>(11).map_err(StoreError::Database)?).unwrap_or_default(),
            refinement_history: serde_json::from_str(&row.get::<String>(12).map_err(StoreError::Database)?).unwrap_or_default(),
            raw_session: row.get::<String>(13).map_err(StoreError::Database)?,
        })
    }

    // ---- architecture -------------------------------------------------------

    pub async fn save_architecture(&self, a: &Architecture) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO architectures (project_id, content, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id) DO UPDATE SET content = excluded.content",
            params![a.project_id.clone(), a.content.clone(), a.created_at.to_rfc3339()],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_architecture(&self, project_id: &str) -> Result<Architecture> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT project_id, content, created_at FROM architectures WHERE project_id = ?1",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "architecture", id: project_id.to_string() }
        })?;
        Ok(Architecture {
            project_id: row.get::<String>(0).map_err(StoreError::Database)?,
            content: row.get::<String>(1).map_err(StoreError::Database)?,
            created_at: parse_ts(&row.get::<String>(2).map_err(StoreError::Database)?)?,
        })
    }

    // ---- phases -------------------------------------------------------------

    pub async fn save_phase(&self, p: &Phase) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO phases (id, project_id, number, title, content, status, created_at, started_at, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at",
            params![
                p.id.clone(),
                p.project_id.clone(),
                p.number,
                p.title.clone(),
                p.content.clone(),
                phase_status_to_str(p.status),
                p.created_at.to_rfc3339(),
                p.started_at.map(|t| t.to_rfc3339()),
                p.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_phase(&self, id: &str) -> Result<Phase> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, project_id, number, title, content, status, created_at, started_at, completed_at
                 FROM phases WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "phase", id: id.to_string() }
        })?;
        row_to_phase(&row)
    }

    pub async fn list_phases(&self, project_id: &str) -> Result<Vec<Phase>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, project_id, number, title, content, status, created_at, started_at, completed_at
                 FROM phases WHERE project_id = ?1 ORDER BY number ASC",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.push(row_to_phase(&row)?);
        }
        Ok(out)
    }

    /// Enforces I2/I3: `in_progress` sets `started_at` only if unset;
    /// `completed` sets `completed_at` unconditionally at transition time.
    pub async fn update_phase_status(&self, id: &str, status: PhaseStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        match status {
            PhaseStatus::InProgress => {
                conn.execute(
                    "UPDATE phases SET status = ?1, started_at = COALESCE(started_at, ?2) WHERE id = ?3",
                    params![phase_status_to_str(status), now_str(), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
            PhaseStatus::Completed => {
                conn.execute(
                    "UPDATE phases SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![phase_status_to_str(status), now_str(), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
            _ => {
                conn.execute(
                    "UPDATE phases SET status = ?1 WHERE id = ?2",
                    params![phase_status_to_str(status), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
        }
        Ok(())
    }

    // ---- tasks ----------------------------------------------------------------

    pub async fn save_task(&self, t: &Task) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (id, phase_id, number, description, status, started_at, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at",
            params![
                t.id.clone(),
                t.phase_id.clone(),
                t.number.clone(),
                t.description.clone(),
                task_status_to_str(t.status),
                t.started_at.map(|v| v.to_rfc3339()),
                t.completed_at.map(|v| v.to_rfc3339()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, phase_id, number, description, status, started_at, completed_at
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "task", id: id.to_string() }
        })?;
        row_to_task(&row)
    }

    pub async fn list_tasks_for_phase(&self, phase_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, phase_id, number, description, status, started_at, completed_at
                 FROM tasks WHERE phase_id = ?1 ORDER BY number ASC",
                params![phase_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.push(row_to_task(&row)?);
        }
        Ok(out)
    }

    /// All tasks for a project in one query (avoids N+1 across phases),
    /// grouped by `phase_id` — the shape the Progress Calculator (C2) needs.
    pub async fn list_tasks_for_project(&self, project_id: &str) -> Result<HashMap<String, Vec<Task>>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT t.id, t.phase_id, t.number, t.description, t.status, t.started_at, t.completed_at
                 FROM tasks t JOIN phases p ON t.phase_id = p.id
                 WHERE p.project_id = ?1
                 ORDER BY t.phase_id, t.number ASC",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out: HashMap<String, Vec<Task>> = HashMap::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            let task = row_to_task(&row)?;
            out.entry(task.phase_id.clone()).or_default().push(task);
        }
        Ok(out)
    }

    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        match status {
            TaskStatus::InProgress => {
                conn.execute(
                    "UPDATE tasks SET status = ?1, started_at = COALESCE(started_at, ?2) WHERE id = ?3",
                    params![task_status_to_str(status), now_str(), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
            TaskStatus::Completed => {
                conn.execute(
                    "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE id = ?3",
                    params![task_status_to_str(status), now_str(), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
            _ => {
                conn.execute(
                    "UPDATE tasks SET status = ?1 WHERE id = ?2",
                    params![task_status_to_str(status), id.to_string()],
                )
                .await
                .map_err(StoreError::Database)?;
            }
        }
        Ok(())
    }

    // ---- checkpoints --------------------------------------------------------

    /// Insert-only: `external_tag` is immutable after creation (I6), so
    /// unlike the other entities this is not exposed as an upsert.
    pub async fn create_checkpoint(&self, c: &Checkpoint) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO checkpoints (id, project_id, name, external_tag, created_at, metadata)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                c.id.clone(),
                c.project_id.clone(),
                c.name.clone(),
                c.external_tag.clone(),
                c.created_at.to_rfc3339(),
                c.metadata.as_ref().map(|m| serde_json::to_string(m).unwrap()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, project_id, name, external_tag, created_at, metadata
                 FROM checkpoints WHERE project_id = ?1 ORDER BY created_at DESC",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.push(row_to_checkpoint(&row)?);
        }
        Ok(out)
    }

    // ---- token usage --------------------------------------------------------

    pub async fn record_token_usage(
        &self,
        project_id: &str,
        phase_id: Option<&str>,
        task_id: Option<&str>,
        provider: &str,
        model: &str,
        tokens_input: i64,
        tokens_output: i64,
        cost: f64,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO token_usage
                (project_id, phase_id, task_id, provider, model, tokens_input, tokens_output, cost, timestamp)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                project_id.to_string(),
                phase_id.map(|s| s.to_string()),
                task_id.map(|s| s.to_string()),
                provider.to_string(),
                model.to_string(),
                tokens_input,
                tokens_output,
                cost,
                now_str(),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn sum_token_usage(&self, project_id: &str) -> Result<(i64, i64, f64)> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COALESCE(SUM(tokens_input),0), COALESCE(SUM(tokens_output),0), COALESCE(SUM(cost),0.0)
                 FROM token_usage WHERE project_id = ?1",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.expect("SUM always returns a row");
        Ok((
            row.get::<i64>(0).map_err(StoreError::Database)?,
            row.get::<i64>(1).map_err(StoreError::Database)?,
            row.get::<f64>(2).map_err(StoreError::Database)?,
        ))
    }

    pub async fn sum_token_usage_by_provider(&self, project_id: &str) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT provider, SUM(tokens_input) + SUM(tokens_output) FROM token_usage
                 WHERE project_id = ?1 GROUP BY provider",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.insert(
                row.get::<String>(0).map_err(StoreError::Database)?,
                row.get::<i64>(1).map_err(StoreError::Database)?,
            );
        }
        Ok(out)
    }

    pub async fn sum_token_usage_by_phase(&self, project_id: &str) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT phase_id, SUM(tokens_input) + SUM(tokens_output) FROM token_usage
                 WHERE project_id = ?1 AND phase_id IS NOT NULL GROUP BY phase_id",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.insert(
                row.get::<String>(0).map_err(StoreError::Database)?,
                row.get::<i64>(1).map_err(StoreError::Database)?,
            );
        }
        Ok(out)
    }

    pub async fn cost_by_day(&self, project_id: &str, start: Timestamp, end: Timestamp) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT substr(timestamp, 1, 10) as day, SUM(cost) FROM token_usage
                 WHERE project_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 GROUP BY day ORDER BY day ASC",
                params![project_id.to_string(), start.to_rfc3339(), end.to_rfc3339()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.insert(
                row.get::<String>(0).map_err(StoreError::Database)?,
                row.get::<f64>(1).map_err(StoreError::Database)?,
            );
        }
        Ok(out)
    }

    // ---- token stats cache ---------------------------------------------------

    pub async fn get_token_stats_cache(&self, project_id: &str) -> Result<Option<TokenStatsCache>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT project_id, total_input, total_output, by_provider, by_phase, last_updated
                 FROM token_stats_cache WHERE project_id = ?1",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let Some(row) = rows.next().await.map_err(StoreError::Database)? else {
            return Ok(None);
        };
        Ok(Some(TokenStatsCache {
            project_id: row.get::<String>(0).map_err(StoreError::Database)?,
            total_input: row.get::<i64>(1).map_err(StoreError::Database)?,
            total_output: row.get::<i64>(2).map_err(StoreError::Database)?,
            by_provider: serde_json::from_str(&row.get::<String>(3).map_err(StoreError::Database)?).unwrap_or_default(),
            by_phase: serde_json::from_str(&row.get::<String>(4).map_err(StoreError::Database)?).unwrap_or_default(),
            last_updated: parse_ts_opt(row.get::<Option<String>>(5).map_err(StoreError::Database)?)?,
        }))
    }

    pub async fn upsert_token_stats_cache(&self, cache: &TokenStatsCache) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO token_stats_cache (project_id, total_input, total_output, by_provider, by_phase, last_updated)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(project_id) DO UPDATE SET
                total_input = excluded.total_input,
                total_output = excluded.total_output,
                by_provider = excluded.by_provider,
                by_phase = excluded.by_phase,
                last_updated = excluded.last_updated",
            params![
                cache.project_id.clone(),
                cache.total_input,
                cache.total_output,
                serde_json::to_string(&cache.by_provider).unwrap(),
                serde_json::to_string(&cache.by_phase).unwrap(),
                cache.last_updated.map(|t| t.to_rfc3339()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn invalidate_token_stats_cache(&self, project_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM token_stats_cache WHERE project_id = ?1",
            params![project_id.to_string()],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    // ---- rate limit / quota ---------------------------------------------------

    pub async fn insert_rate_limit(&self, provider: &str, remaining: i64, limit: i64, reset_at: Timestamp) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO rate_limit_info (provider, requests_remaining, requests_limit, reset_at, checked_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![provider.to_string(), remaining, limit, reset_at.to_rfc3339(), now_str()],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_latest_rate_limit(&self, provider: &str) -> Result<Option<RateLimitInfo>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, provider, requests_remaining, requests_limit, reset_at, checked_at
                 FROM rate_limit_info WHERE provider = ?1 ORDER BY checked_at DESC LIMIT 1",
                params![provider.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let Some(row) = rows.next().await.map_err(StoreError::Database)? else {
            return Ok(None);
        };
        Ok(Some(RateLimitInfo {
            id: row.get::<i64>(0).map_err(StoreError::Database)?,
            provider: row.get::<String>(1).map_err(StoreError::Database)?,
            requests_remaining: row.get::<i64>(2).map_err(StoreError::Database)?,
            requests_limit: row.get::<i64>(3).map_err(StoreError::Database)?,
            reset_at: parse_ts(&row.get::<String>(4).map_err(StoreError::Database)?)?,
            checked_at: parse_ts(&row.get::<String>(5).map_err(StoreError::Database)?)?,
        }))
    }

    pub async fn insert_quota(
        &self,
        provider: &str,
        tokens_remaining: Option<i64>,
        tokens_limit: Option<i64>,
        cost_remaining: Option<f64>,
        cost_limit: Option<f64>,
        reset_at: Timestamp,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO quota_info
                (provider, tokens_remaining, tokens_limit, cost_remaining, cost_limit, reset_at, checked_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                provider.to_string(),
                tokens_remaining,
                tokens_limit,
                cost_remaining,
                cost_limit,
                reset_at.to_rfc3339(),
                now_str(),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_latest_quota(&self, provider: &str) -> Result<Option<QuotaInfo>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, provider, tokens_remaining, tokens_limit, cost_remaining, cost_limit, reset_at, checked_at
                 FROM quota_info WHERE provider = ?1 ORDER BY checked_at DESC LIMIT 1",
                params![provider.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let Some(row) = rows.next().await.map_err(StoreError::Database)? else {
            return Ok(None);
        };
        Ok(Some(QuotaInfo {
            id: row.get::<i64>(0).map_err(StoreError::Database)?,
            provider: row.get::<String>(1).map_err(StoreError::Database)?,
            tokens_remaining: row.get::<Option<i64>>(2).map_err(StoreError::Database)?,
            tokens_limit: row.get::<Option<i64>>(3).map_err(StoreError::Database)?,
            cost_remaining: row.get::<Option<f64>>(4).map_err(StoreError::Database)?,
            cost_limit: row.get::<Option<f64>>(5).map_err(StoreError::Database)?,
            reset_at: parse_ts(&row.get::<String>(6).map_err(StoreError::Database)?)?,
            checked_at: parse_ts(&row.get::<String>(7).map_err(StoreError::Database)?)?,
        }))
    }

    // ---- blockers ---------------------------------------------------------

    pub async fn save_blocker(&self, b: &Blocker) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO blockers (id, task_id, description, resolution, created_at, resolved_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                resolution = excluded.resolution,
                resolved_at = excluded.resolved_at",
            params![
                b.id.clone(),
                b.task_id.clone(),
                b.description.clone(),
                b.resolution.clone(),
                b.created_at.to_rfc3339(),
                b.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    /// Direct single-row getter (resolves the "GetBlocker semantics" open
    /// question — see DESIGN.md).
    pub async fn get_blocker(&self, id: &str) -> Result<Blocker> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, task_id, description, resolution, created_at, resolved_at
                 FROM blockers WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "blocker", id: id.to_string() }
        })?;
        row_to_blocker(&row)
    }

    /// Joins blockers -> tasks -> phases, filtered by `resolved_at IS NULL`;
    /// an empty `project_id` means "all projects".
    pub async fn list_active_blockers(&self, project_id: Option<&str>) -> Result<Vec<Blocker>> {
        let conn = self.conn.lock().await;
        let sql = "SELECT b.id, b.task_id, b.description, b.resolution, b.created_at, b.resolved_at
                    FROM blockers b
                    JOIN tasks t ON b.task_id = t.id
                    JOIN phases p ON t.phase_id = p.id
                    WHERE b.resolved_at IS NULL AND (?1 IS NULL OR p.project_id = ?1)";
        let mut rows = conn
            .query(sql, params![project_id.map(|s| s.to_string())])
            .await
            .map_err(StoreError::Database)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.push(row_to_blocker(&row)?);
        }
        Ok(out)
    }

    // ---- detours ------------------------------------------------------------

    pub async fn save_detour(&self, d: &Detour) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO detours
                (id, project_id, phase_id, task_id, description, reason, new_task_ids, status, created_at, completed_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                reason = excluded.reason,
                new_task_ids = excluded.new_task_ids,
                status = excluded.status,
                completed_at = excluded.completed_at",
            params![
                d.id.clone(),
                d.project_id.clone(),
                d.phase_id.clone(),
                d.task_id.clone(),
                d.description.clone(),
                d.reason.clone(),
                serde_json::to_string(&d.new_task_ids).unwrap(),
                detour_status_to_str(d.status),
                d.created_at.to_rfc3339(),
                d.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_detour(&self, id: &str) -> Result<Detour> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, project_id, phase_id, task_id, description, reason, new_task_ids, status, created_at, completed_at
                 FROM detours WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let row = rows.next().await.map_err(StoreError::Database)?.ok_or_else(|| {
            StoreError::NotFound { entity: "detour", id: id.to_string() }
        })?;
        row_to_detour(&row)
    }

    pub async fn list_detours(&self, project_id: &str) -> Result<Vec<Detour>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, project_id, phase_id, task_id, description, reason, new_task_ids, status, created_at, completed_at
                 FROM detours WHERE project_id = ?1 ORDER BY created_at ASC",
                params![project_id.to_string()],
            )
            .await
            .map_err(StoreError::Database)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(StoreError::Database)? {
            out.push(row_to_detour(&row)?);
        }
        Ok(out)
    }

    // ---- config ---------------------------------------------------------------

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key.to_string(), value.to_string(), now_str()],
        )
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT value FROM config WHERE key = ?1", params![key.to_string()])
            .await
            .map_err(StoreError::Database)?;
        let Some(row) = rows.next().await.map_err(StoreError::Database)? else {
            return Ok(None);
        };
        Ok(Some(row.get::<String>(0).map_err(StoreError::Database)?))
    }
}

// ---- row <-> enum conversions -------------------------------------------------

fn stage_to_str(s: ProjectStage) -> &'static str {
    match s {
        ProjectStage::Init => "init",
        ProjectStage::Interview => "interview",
        ProjectStage::Design => "design",
        ProjectStage::Plan => "plan",
        ProjectStage::Review => "review",
        ProjectStage::Develop => "develop",
        ProjectStage::Complete => "complete",
    }
}

fn stage_from_str(s: &str) -> Result<ProjectStage> {
    Ok(match s {
        "init" => ProjectStage::Init,
        "interview" => ProjectStage::Interview,
        "design" => ProjectStage::Design,
        "plan" => ProjectStage::Plan,
        "review" => ProjectStage::Review,
        "develop" => ProjectStage::Develop,
        "complete" => ProjectStage::Complete,
        other => return Err(StoreError::Other(anyhow::anyhow!("unknown stage {other}"))),
    })
}

fn phase_status_to_str(s: PhaseStatus) -> &'static str {
    match s {
        PhaseStatus::NotStarted => "not_started",
        PhaseStatus::InProgress => "in_progress",
        PhaseStatus::Completed => "completed",
        PhaseStatus::Blocked => "blocked",
    }
}

fn phase_status_from_str(s: &str) -> Result<PhaseStatus> {
    Ok(match s {
        "not_started" => PhaseStatus::NotStarted,
        "in_progress" => PhaseStatus::InProgress,
        "completed" => PhaseStatus::Completed,
        "blocked" => PhaseStatus::Blocked,
        other => return Err(StoreError::Other(anyhow::anyhow!("unknown phase status {other}"))),
    })
}

fn task_status_to_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::NotStarted => "not_started",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Blocked => "blocked",
        TaskStatus::Skipped => "skipped",
    }
}

fn task_status_from_str(s: &str) -> Result<TaskStatus> {
    Ok(match s {
        "not_started" => TaskStatus::NotStarted,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "blocked" => TaskStatus::Blocked,
        "skipped" => TaskStatus::Skipped,
        other => return Err(StoreError::Other(anyhow::anyhow!("unknown task status {other}"))),
    })
}

fn detour_status_to_str(s: DetourStatus) -> &'static str {
    match s {
        DetourStatus::Pending => "pending",
        DetourStatus::Gathering => "gathering",
        DetourStatus::Planned => "planned",
        DetourStatus::Active => "active",
        DetourStatus::Completed => "completed",
        DetourStatus::Cancelled => "cancelled",
    }
}

fn detour_status_from_str(s: &str) -> Result<DetourStatus> {
    Ok(match s {
        "pending" => DetourStatus::Pending,
        "gathering" => DetourStatus::Gathering,
        "planned" => DetourStatus::Planned,
        "active" => DetourStatus::Active,
        "completed" => DetourStatus::Completed,
        "cancelled" => DetourStatus::Cancelled,
        other => return Err(StoreError::Other(anyhow::anyhow!("unknown detour status {other}"))),
    })
}

fn row_to_phase(row: &libsql::Row) -> Result<Phase> {
    Ok(Phase {
        id: row.get::<String>(0).map_err(StoreError::Database)?,
        project_id: row.get::<String>(1).map_err(StoreError::Database)?,
        number: row.get::<i64>(2).map_err(StoreError::Database)?,
        title: row.get::<String>(3).map_err(StoreError::Database)?,
        content: row.get::<String>(4).map_err(StoreError::Database)?,
        status: phase_status_from_str(&row.get::<String>(5).map_err(StoreError::Database)?)?,
        created_at: parse_ts(&row.get::<String>(6).map_err(StoreError::Database)?)?,
        started_at: parse_ts_opt(row.get::<Option<String>>(7).map_err(StoreError::Database)?)?,
        completed_at: parse_ts_opt(row.get::<Option<String>>(8).map_err(StoreError::Database)?)?,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task> {
    Ok(Task {
        id: row.get::<String>(0).map_err(StoreError::Database)?,
        phase_id: row.get::<String>(1).map_err(StoreError::Database)?,
        number: row.get::<String>(2).map_err(StoreError::Database)?,
        description: row.get::<String>(3).map_err(StoreError::Database)?,
        status: task_status_from_str(&row.get::<String>(4).map_err(StoreError::Database)?)?,
        started_at: parse_ts_opt(row.get::<Option<String>>(5).map_err(StoreError::Database)?)?,
        completed_at: parse_ts_opt(row.get::<Option<String>>(6).map_err(StoreError::Database)?)?,
    })
}

fn row_to_checkpoint(row: &libsql::Row) -> Result<Checkpoint> {
    let metadata: Option<String> = row.get::<Option<String>>(5).map_err(StoreError::Database)?;
    Ok(Checkpoint {
        id: row.get::<String>(0).map_err(StoreError::Database)?,
        project_id: row.get::<String>(1).map_err(StoreError::Database)?,
        name: row.get::<String>(2).map_err(StoreError::Database)?,
        external_tag: row.get::<String>(3).map_err(StoreError::Database)?,
        created_at: parse_ts(&row.get::<String>(4).map_err(StoreError::Database)?)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn row_to_blocker(row: &libsql::Row) -> Result<Blocker> {
    Ok(Blocker {
        id: row.get::<String>(0).map_err(StoreError::Database)?,
        task_id: row.get::<String>(1).map_err(StoreError::Database)?,
        description: row.get::<String>(2).map_err(StoreError::Database)?,
        resolution: row.get::<Option<String>>(3).map_err(StoreError::Database)?,
        created_at: parse_ts(&row.get::<String>(4).map_err(StoreError::Database)?)?,
        resolved_at: parse_ts_opt(row.get::<Option<String>>(5).map_err(StoreError::Database)?)?,
    })
}

fn row_to_detour(row: &libsql::Row) -> Result<Detour> {
    Ok(Detour {
        id: row.get::<String>(0).map_err(StoreError::Database)?,
        project_id: row.get::<String>(1).map_err(StoreError::Database)?,
        phase_id: row.get::<String>(2).map_err(StoreError::Database)?,
        task_id: row.get::<String>(3).map_err(StoreError::Database)?,
        description: row.get::<String>(4).map_err(StoreError::Database)?,
        reason: row.get::<String>(5).map_err(StoreError::Database)?,
        new_task_ids: serde_json::from_str(&row.get::<String>(6).map_err(StoreError::Database)?).unwrap_or_default(),
        status: detour_status_from_str(&row.get::<String>(7).map_err(StoreError::Database)?)?,
        created_at: parse_ts(&row.get::<String>(8).map_err(StoreError::Database)?)?,
        completed_at: parse_ts_opt(row.get::<Option<String>>(9).map_err(StoreError::Database)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            name: "demo".to_string(),
            created_at: Utc::now(),
            current_stage: ProjectStage::Init,
            current_phase_id: None,
        }
    }

    fn sample_phase(id: &str, project_id: &str, number: i64) -> Phase {
        Phase {
            id: id.to_string(),
            project_id: project_id.to_string(),
            number,
            title: "Phase".to_string(),
            content: "content".to_string(),
            status: PhaseStatus::NotStarted,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn sample_task(id: &str, phase_id: &str, number: &str) -> Task {
        Task {
            id: id.to_string(),
            phase_id: phase_id.to_string(),
            number: number.to_string(),
            description: "do the thing".to_string(),
            status: TaskStatus::NotStarted,
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent_and_reaches_full_version() {
        let store = Store::open_in_memory().await.unwrap();
        let v1 = store.current_version().await.unwrap();
        store.migrate().await.unwrap();
        let v2 = store.current_version().await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v2, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn rollback_then_migrate_to_version_restores_schema() {
        let store = Store::open_in_memory().await.unwrap();
        let full = store.current_version().await.unwrap();
        store.rollback().await.unwrap();
        assert_eq!(store.current_version().await.unwrap(), full - 1);
        store.migrate_to_version(1).await.unwrap();
        assert_eq!(store.current_version().await.unwrap(), 1);
        store.migrate_to_version(full).await.unwrap();
        assert_eq!(store.current_version().await.unwrap(), full);
    }

    #[tokio::test]
    async fn project_round_trips() {
        let store = Store::open_in_memory().await.unwrap();
        let p = sample_project("proj-1");
        store.save_project(&p).await.unwrap();
        let loaded = store.get_project("proj-1").await.unwrap();
        assert_eq!(loaded.id, p.id);
        assert_eq!(loaded.name, p.name);
        assert_eq!(loaded.current_stage, p.current_stage);
    }

    #[tokio::test]
    async fn phase_and_task_fk_integrity_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        let phase = sample_phase("phase-1", "missing-project", 1);
        let result = store.save_phase(&phase).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn phase_status_transition_sets_started_at_once() {
        let store = Store::open_in_memory().await.unwrap();
        store.save_project(&sample_project("proj-1")).await.unwrap();
        let phase = sample_phase("phase-1", "proj-1", 1);
        store.save_phase(&phase).await.unwrap();

        store.update_phase_status("phase-1", PhaseStatus::InProgress).await.unwrap();
        let first = store.get_phase("phase-1").await.unwrap();
        let first_started = first.started_at.unwrap();

        store.update_phase_status("phase-1", PhaseStatus::InProgress).await.unwrap();
        let second = store.get_phase("phase-1").await.unwrap();
        assert_eq!(second.started_at.unwrap(), first_started);
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependents() {
        let store = Store::open_in_memory().await.unwrap();
        store.save_project(&sample_project("proj-1")).await.unwrap();
        store.save_phase(&sample_phase("phase-1", "proj-1", 1)).await.unwrap();
        store.save_task(&sample_task("task-1", "phase-1", "1.1")).await.unwrap();
        store
            .save_blocker(&Blocker {
                id: "blocker-1".to_string(),
                task_id: "task-1".to_string(),
                description: "stuck".to_string(),
                resolution: None,
                created_at: Utc::now(),
                resolved_at: None,
            })
            .await
            .unwrap();

        store.delete_project("proj-1").await.unwrap();

        assert!(store.get_phase("phase-1").await.is_err());
        assert!(store.get_task("task-1").await.is_err());
        assert!(store.get_blocker("blocker-1").await.is_err());
    }

    #[tokio::test]
    async fn token_usage_is_append_only_and_sums_correctly() {
        let store = Store::open_in_memory().await.unwrap();
        store.save_project(&sample_project("proj-1")).await.unwrap();
        store
            .record_token_usage("proj-1", None, None, "anthropic", "sonnet", 100, 50, 0.5)
            .await
            .unwrap();
        store
            .record_token_usage("proj-1", None, None, "anthropic", "sonnet", 200, 75, 1.0)
            .await
            .unwrap();
        let (input, output, cost) = store.sum_token_usage("proj-1").await.unwrap();
        assert_eq!(input, 300);
        assert_eq!(output, 125);
        assert!((cost - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn get_blocker_is_a_direct_lookup() {
        let store = Store::open_in_memory().await.unwrap();
        store.save_project(&sample_project("proj-1")).await.unwrap();
        store.save_phase(&sample_phase("phase-1", "proj-1", 1)).await.unwrap();
        store.save_task(&sample_task("task-1", "phase-1", "1.1")).await.unwrap();
        let blocker = Blocker {
            id: "blocker-1".to_string(),
            task_id: "task-1".to_string(),
            description: "stuck".to_string(),
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.save_blocker(&blocker).await.unwrap();
        let loaded = store.get_blocker("blocker-1").await.unwrap();
        assert_eq!(loaded.task_id, "task-1");
    }

    #[tokio::test]
    async fn backup_and_restore_preserves_rows_inserted_after_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let backup_path = dir.path().join("backup.db");
        let store = Store::open(&db_path).await.unwrap();

        store.save_project(&sample_project("proj-1")).await.unwrap();
        store
            .create_checkpoint(&Checkpoint {
                id: "cp-1".to_string(),
                project_id: "proj-1".to_string(),
                name: "cp1".to_string(),
                external_tag: "tag-1".to_string(),
                created_at: Utc::now(),
                metadata: None,
            })
            .await
            .unwrap();
        store.backup(&backup_path).await.unwrap();

        store
            .record_token_usage("proj-1", None, None, "anthropic", "sonnet", 100, 50, 0.1)
            .await
            .unwrap();

        store
            .create_checkpoint(&Checkpoint {
                id: "cp-2".to_string(),
                project_id: "proj-1".to_string(),
                name: "cp2".to_string(),
                external_tag: "tag-2".to_string(),
                created_at: Utc::now(),
                metadata: None,
            })
            .await
            .unwrap();
        let mut advanced = store.get_project("proj-1").await.unwrap();
        advanced.current_stage = ProjectStage::Develop;
        store.save_project(&advanced).await.unwrap();

        store.restore(&backup_path).await.unwrap();

        let restored = store.get_project("proj-1").await.unwrap();
        assert_eq!(restored.current_stage, ProjectStage::Init);
        let checkpoints = store.list_checkpoints("proj-1").await.unwrap();
        let names: Vec<_> = checkpoints.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"cp1"));
        assert!(names.contains(&"cp2"));

        let (total_input, total_output, _) = store.sum_token_usage("proj-1").await.unwrap();
        assert_eq!(total_input, 100);
        assert_eq!(total_output, 50);
    }
}
