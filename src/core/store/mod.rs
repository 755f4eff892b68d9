mod runs;
mod sessions;
mod sites;
mod sync_state;
pub mod types;

use anyhow::{Result, bail};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::lifecycle::LifecycleComponent;
use crate::platform::{NativePlatform, Platform};

pub use types::{
    RunRecord, RunRemoteFields, RunState, RunWithSessions, SessionRecord, SiteRecord,
    SyncStateRecord,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sites (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        sync_enabled INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL,
        site_name TEXT,
        title TEXT,
        state TEXT NOT NULL,
        branch TEXT,
        pull_request_url TEXT,
        pull_request_state TEXT,
        pull_request_branch TEXT,
        deploy_preview_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        synced_at TEXT,
        archived_at TEXT,
        pr_committed_at TEXT,
        pr_needs_update INTEGER NOT NULL DEFAULT 0,
        pr_check_status TEXT,
        custom_notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
        state TEXT NOT NULL,
        prompt TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_sync_at TEXT,
        next_sync_at TEXT,
        backoff_seconds INTEGER NOT NULL DEFAULT 30,
        consecutive_no_change INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_site_id ON runs(site_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_pull_request_url ON runs(pull_request_url)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_run_id ON sessions(run_id, created_at)",
];

/// Local mirror of remote runs, their sessions, the site allowlist and the
/// sync schedule. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct MirrorStore {
    db: Arc<Mutex<Connection>>,
}

impl MirrorStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
            NativePlatform::restrict_dir_permissions(parent);
        }

        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        Self::init(db)
    }

    /// Fresh private database, used by tests and one-shot tooling.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA foreign_keys = ON;")?;
        for statement in SCHEMA {
            db.execute(statement, [])?;
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl LifecycleComponent for MirrorStore {
    fn name(&self) -> &'static str {
        "mirror store"
    }

    /// Refuses to serve from a damaged database file.
    async fn on_init(&mut self) -> Result<()> {
        let db = self.db.lock().await;
        let verdict: String = db.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict != "ok" {
            bail!("mirror database failed integrity check: {}", verdict);
        }
        let runs: i64 = db.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        info!("Mirror store ready ({} run(s) mirrored)", runs);
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute_batch("PRAGMA optimize;")?;
        info!("Mirror store closed");
        Ok(())
    }
}
