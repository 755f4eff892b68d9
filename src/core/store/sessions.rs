use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::MirrorStore;
use super::types::SessionRecord;

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        run_id: row.get(1)?,
        state: row.get(2)?,
        prompt: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl MirrorStore {
    pub async fn list_sessions(&self, run_id: &str) -> Result<Vec<SessionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, run_id, state, prompt, created_at, updated_at
             FROM sessions WHERE run_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], session_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                "SELECT id, run_id, state, prompt, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![id],
                session_from_row,
            )
            .optional()?)
    }

    /// `prompt` and `created_at` are fixed at insertion; a duplicate id is a no-op.
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<bool> {
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT INTO sessions (id, run_id, state, prompt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                session.id,
                session.run_id,
                session.state,
                session.prompt,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub async fn update_session_state(
        &self,
        id: &str,
        state: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state, updated_at, id],
        )?;
        Ok(rows > 0)
    }
}
