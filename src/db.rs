use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::models::{Build, BuildStatus, Project, SourceFile};

/// Async-safe handle to the build database.
///
/// Wraps `AtelierDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<AtelierDb>>,
}

impl DbHandle {
    pub fn new(db: AtelierDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&AtelierDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Used where blocking is
    /// acceptable: startup initialization and tests. Callers must ensure
    /// this is NOT called from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, AtelierDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct AtelierDb {
    conn: Connection,
}

impl AtelierDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS builds (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    owner_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'building',
                    artifact_locator TEXT,
                    artifact_hash TEXT,
                    has_issues INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    finished_at TEXT,
                    UNIQUE(project_id, version)
                );

                CREATE TABLE IF NOT EXISTS build_files (
                    build_id TEXT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    content TEXT NOT NULL,
                    PRIMARY KEY (build_id, path)
                );

                CREATE INDEX IF NOT EXISTS idx_builds_project ON builds(project_id, version);
                CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(project_id, status);
                ",
            )
            .context("Failed to create tables")?;

        Ok(())
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    pub fn create_project(&self, owner_id: &str, name: &str) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO projects (id, owner_id, name) VALUES (?1, ?2, ?3)",
                params![id, owner_id, name],
            )
            .context("Failed to insert project")?;
        self.get_project(&id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, owner_id, name, created_at FROM projects WHERE id = ?1")
            .context("Failed to prepare get_project")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query project")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read project row")?)),
            None => Ok(None),
        }
    }

    // ── Build records ─────────────────────────────────────────────────

    /// Create a build record in `building` status with the next version for
    /// the project. The version is computed inside the INSERT itself, so
    /// even concurrent saves can never observe the same number: the
    /// increment and the read are one statement under one connection.
    pub fn create_build(&self, project_id: &str, owner_id: &str) -> Result<Build> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO builds (id, project_id, owner_id, version)
                 VALUES (?1, ?2, ?3,
                         (SELECT COALESCE(MAX(version), 0) + 1 FROM builds WHERE project_id = ?2))",
                params![id, project_id, owner_id],
            )
            .context("Failed to insert build")?;
        self.get_build(&id)?.context("Build not found after insert")
    }

    pub fn get_build(&self, id: &str) -> Result<Option<Build>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE id = ?1", BUILD_SELECT))
            .context("Failed to prepare get_build")?;
        let mut rows = stmt
            .query_map(params![id], map_build_row)
            .context("Failed to query build")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read build row")?;
                Ok(Some(r.into_build()?))
            }
            None => Ok(None),
        }
    }

    pub fn build_by_version(&self, project_id: &str, version: i64) -> Result<Option<Build>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE project_id = ?1 AND version = ?2",
                BUILD_SELECT
            ))
            .context("Failed to prepare build_by_version")?;
        let mut rows = stmt
            .query_map(params![project_id, version], map_build_row)
            .context("Failed to query build by version")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read build row")?;
                Ok(Some(r.into_build()?))
            }
            None => Ok(None),
        }
    }

    /// The preview head: the most recently finalized completed build.
    /// Finalize order decides races between concurrent saves; version
    /// breaks same-second timestamp ties.
    pub fn latest_completed_build(&self, project_id: &str) -> Result<Option<Build>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE project_id = ?1 AND status = 'completed'
                 ORDER BY finished_at DESC, version DESC LIMIT 1",
                BUILD_SELECT
            ))
            .context("Failed to prepare latest_completed_build")?;
        let mut rows = stmt
            .query_map(params![project_id], map_build_row)
            .context("Failed to query latest completed build")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read build row")?;
                Ok(Some(r.into_build()?))
            }
            None => Ok(None),
        }
    }

    pub fn list_builds(&self, project_id: &str) -> Result<Vec<Build>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE project_id = ?1 ORDER BY version DESC",
                BUILD_SELECT
            ))
            .context("Failed to prepare list_builds")?;
        let rows = stmt
            .query_map(params![project_id], map_build_row)
            .context("Failed to query builds")?;
        let mut builds = Vec::new();
        for row in rows {
            let r = row.context("Failed to read build row")?;
            builds.push(r.into_build()?);
        }
        Ok(builds)
    }

    /// Transition a build out of `building` exactly once. A second call for
    /// the same record fails: the guard is the `status = 'building'`
    /// predicate, so whichever finalize lands first wins and the record can
    /// never be finalized twice or left in `building` silently.
    pub fn finalize_build(
        &self,
        id: &str,
        status: BuildStatus,
        artifact_locator: Option<&str>,
        artifact_hash: Option<&str>,
        has_issues: bool,
        error: Option<&str>,
    ) -> Result<Build> {
        if status == BuildStatus::Building {
            anyhow::bail!("Cannot finalize build {} back to 'building'", id);
        }
        let updated = self
            .conn
            .execute(
                "UPDATE builds
                 SET status = ?2, artifact_locator = ?3, artifact_hash = ?4,
                     has_issues = ?5, error = ?6, finished_at = datetime('now')
                 WHERE id = ?1 AND status = 'building'",
                params![
                    id,
                    status.as_str(),
                    artifact_locator,
                    artifact_hash,
                    has_issues as i64,
                    error
                ],
            )
            .context("Failed to finalize build")?;
        if updated == 0 {
            anyhow::bail!("Build {} is unknown or already finalized", id);
        }
        self.get_build(id)?.context("Build not found after finalize")
    }

    // ── Source snapshots ──────────────────────────────────────────────

    /// Persist the generated input files for a build. All-or-nothing.
    pub fn persist_source_snapshot(&self, build_id: &str, files: &[SourceFile]) -> Result<()> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin snapshot transaction")?;
        for file in files {
            tx.execute(
                "INSERT OR REPLACE INTO build_files (build_id, path, content) VALUES (?1, ?2, ?3)",
                params![build_id, file.path, file.content],
            )
            .context("Failed to insert snapshot file")?;
        }
        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }

    pub fn source_snapshot(&self, build_id: &str) -> Result<Vec<SourceFile>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content FROM build_files WHERE build_id = ?1 ORDER BY path")
            .context("Failed to prepare source_snapshot")?;
        let rows = stmt
            .query_map(params![build_id], |row| {
                Ok(SourceFile {
                    path: row.get(0)?,
                    content: row.get(1)?,
                })
            })
            .context("Failed to query snapshot")?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row.context("Failed to read snapshot row")?);
        }
        Ok(files)
    }
}

const BUILD_SELECT: &str = "SELECT id, project_id, owner_id, version, status, artifact_locator,
        artifact_hash, has_issues, error, created_at, finished_at FROM builds";

struct BuildRow {
    id: String,
    project_id: String,
    owner_id: String,
    version: i64,
    status: String,
    artifact_locator: Option<String>,
    artifact_hash: Option<String>,
    has_issues: i64,
    error: Option<String>,
    created_at: String,
    finished_at: Option<String>,
}

fn map_build_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildRow> {
    Ok(BuildRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        owner_id: row.get(2)?,
        version: row.get(3)?,
        status: row.get(4)?,
        artifact_locator: row.get(5)?,
        artifact_hash: row.get(6)?,
        has_issues: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        finished_at: row.get(10)?,
    })
}

impl BuildRow {
    fn into_build(self) -> Result<Build> {
        let status = self
            .status
            .parse::<BuildStatus>()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid build status in database")?;
        Ok(Build {
            id: self.id,
            project_id: self.project_id,
            owner_id: self.owner_id,
            version: self.version,
            status,
            artifact_locator: self.artifact_locator,
            artifact_hash: self.artifact_hash,
            has_issues: self.has_issues != 0,
            error: self.error,
            created_at: self.created_at,
            finished_at: self.finished_at,
        })
    }
}
