use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, Row, params};

use super::MirrorStore;
use super::types::{RunRecord, RunRemoteFields, RunState, RunWithSessions};

const RUN_COLUMNS: &str = "id, site_id, site_name, title, state, branch, pull_request_url, \
     pull_request_state, pull_request_branch, deploy_preview_url, created_at, updated_at, \
     synced_at, archived_at, pr_committed_at, pr_needs_update, pr_check_status, custom_notes";

impl ToSql for RunState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        RunState::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown run state '{}'", raw).into()))
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        site_name: row.get(2)?,
        title: row.get(3)?,
        state: row.get(4)?,
        branch: row.get(5)?,
        pull_request_url: row.get(6)?,
        pull_request_state: row.get(7)?,
        pull_request_branch: row.get(8)?,
        deploy_preview_url: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        synced_at: row.get(12)?,
        archived_at: row.get(13)?,
        pr_committed_at: row.get(14)?,
        pr_needs_update: row.get::<_, i32>(15)? != 0,
        pr_check_status: row.get(16)?,
        custom_notes: row.get(17)?,
    })
}

impl MirrorStore {
    pub async fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        Ok(db.query_row(&sql, params![id], run_from_row).optional()?)
    }

    pub async fn find_run_by_pull_request_url(&self, url: &str) -> Result<Option<RunRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM runs WHERE pull_request_url = ?1 ORDER BY updated_at DESC LIMIT 1",
            RUN_COLUMNS
        );
        Ok(db.query_row(&sql, params![url], run_from_row).optional()?)
    }

    /// Active runs, or soft-archived ones when `archived` is set; newest activity first.
    pub async fn list_runs(&self, archived: bool) -> Result<Vec<RunRecord>> {
        let db = self.db.lock().await;
        let filter = if archived {
            "archived_at IS NOT NULL"
        } else {
            "archived_at IS NULL"
        };
        let sql = format!(
            "SELECT {} FROM runs WHERE {} ORDER BY updated_at DESC, id ASC",
            RUN_COLUMNS, filter
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], run_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_run_with_sessions(&self, id: &str) -> Result<Option<RunWithSessions>> {
        let Some(run) = self.get_run(id).await? else {
            return Ok(None);
        };
        let sessions = self.list_sessions(id).await?;
        Ok(Some(RunWithSessions { run, sessions }))
    }

    /// Returns false when a row with the same id already exists.
    pub async fn insert_run(&self, run: &RunRecord) -> Result<bool> {
        let db = self.db.lock().await;
        let sql = format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO NOTHING",
            RUN_COLUMNS
        );
        let inserted = db.execute(
            &sql,
            params![
                run.id,
                run.site_id,
                run.site_name,
                run.title,
                run.state,
                run.branch,
                run.pull_request_url,
                run.pull_request_state,
                run.pull_request_branch,
                run.deploy_preview_url,
                run.created_at,
                run.updated_at,
                run.synced_at,
                run.archived_at,
                run.pr_committed_at,
                run.pr_needs_update as i32,
                run.pr_check_status,
                run.custom_notes,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub async fn apply_remote_fields(
        &self,
        id: &str,
        fields: &RunRemoteFields,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET state = ?1, pull_request_url = ?2, pull_request_state = ?3,
                 pull_request_branch = ?4, deploy_preview_url = ?5, updated_at = ?6, synced_at = ?6
             WHERE id = ?7",
            params![
                fields.state,
                fields.pull_request_url,
                fields.pull_request_state,
                fields.pull_request_branch,
                fields.deploy_preview_url,
                now,
                id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub async fn touch_run_synced(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE runs SET synced_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub async fn set_pr_needs_update(&self, id: &str, needs_update: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET pr_needs_update = ?1 WHERE id = ?2",
            params![needs_update as i32, id],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_pr_check_status(&self, id: &str, status: Option<&str>) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET pr_check_status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_deploy_preview_url(&self, id: &str, url: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET deploy_preview_url = ?1 WHERE id = ?2",
            params![url, id],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_pull_request_state(
        &self,
        id: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET pull_request_state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, now, id],
        )?;
        Ok(rows > 0)
    }

    /// Records an explicit PR create/update by the user: copies the PR
    /// fields, stamps the commit time and clears the stale flag.
    pub async fn record_pull_request(
        &self,
        id: &str,
        url: Option<&str>,
        state: Option<&str>,
        branch: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET
                 pull_request_url = COALESCE(?1, pull_request_url),
                 pull_request_state = COALESCE(?2, pull_request_state),
                 pull_request_branch = COALESCE(?3, pull_request_branch),
                 pr_committed_at = ?4, pr_needs_update = 0, updated_at = ?4
             WHERE id = ?5",
            params![url, state, branch, now, id],
        )?;
        Ok(rows > 0)
    }

    /// Soft archive. Runs are never deleted from the mirror.
    pub async fn set_archived(
        &self,
        id: &str,
        archived: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<RunRecord>> {
        {
            let db = self.db.lock().await;
            let archived_at = archived.then_some(now);
            db.execute(
                "UPDATE runs SET archived_at = ?1 WHERE id = ?2",
                params![archived_at, id],
            )?;
        }
        self.get_run(id).await
    }

    pub async fn set_custom_notes(&self, id: &str, notes: Option<&str>) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE runs SET custom_notes = ?1 WHERE id = ?2",
            params![notes, id],
        )?;
        Ok(rows > 0)
    }
}
