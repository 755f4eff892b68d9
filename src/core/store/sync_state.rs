use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use super::MirrorStore;
use super::types::SyncStateRecord;

impl MirrorStore {
    pub async fn get_sync_state(&self) -> Result<Option<SyncStateRecord>> {
        let db = self.db.lock().await;
        let state = db
            .query_row(
                "SELECT last_sync_at, next_sync_at, backoff_seconds, consecutive_no_change
                 FROM sync_state WHERE id = 1",
                [],
                |row| {
                    Ok(SyncStateRecord {
                        last_sync_at: row.get(0)?,
                        next_sync_at: row.get(1)?,
                        backoff_seconds: row.get::<_, i64>(2)?.max(0) as u64,
                        consecutive_no_change: row.get::<_, i64>(3)?.max(0) as u32,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Writes the singleton row, creating it when absent. Last writer wins.
    pub async fn put_sync_state(&self, state: &SyncStateRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO sync_state
                 (id, last_sync_at, next_sync_at, backoff_seconds, consecutive_no_change)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                state.last_sync_at,
                state.next_sync_at,
                state.backoff_seconds as i64,
                state.consecutive_no_change as i64,
            ],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn sync_state_row_count(&self) -> Result<i64> {
        let db = self.db.lock().await;
        Ok(db.query_row("SELECT COUNT(*) FROM sync_state", [], |row| row.get(0))?)
    }
}
