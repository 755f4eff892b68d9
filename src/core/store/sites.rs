use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::MirrorStore;
use super::types::SiteRecord;

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<SiteRecord> {
    Ok(SiteRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        updated_at: row.get(2)?,
        sync_enabled: row.get::<_, i32>(3)? != 0,
    })
}

impl MirrorStore {
    pub async fn list_sites(&self) -> Result<Vec<SiteRecord>> {
        self.query_sites("SELECT id, name, updated_at, sync_enabled FROM sites ORDER BY name ASC")
            .await
    }

    /// The owner-controlled allowlist the reconciler polls.
    pub async fn list_sync_enabled_sites(&self) -> Result<Vec<SiteRecord>> {
        self.query_sites(
            "SELECT id, name, updated_at, sync_enabled FROM sites
             WHERE sync_enabled = 1 ORDER BY name ASC",
        )
        .await
    }

    async fn query_sites(&self, sql: &str) -> Result<Vec<SiteRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map([], site_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn get_site(&self, id: &str) -> Result<Option<SiteRecord>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                "SELECT id, name, updated_at, sync_enabled FROM sites WHERE id = ?1",
                params![id],
                site_from_row,
            )
            .optional()?)
    }

    /// Inserts or renames a site without touching its `sync_enabled` flag.
    pub async fn upsert_site(&self, id: &str, name: &str, now: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sites (id, name, updated_at, sync_enabled) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
            params![id, name, now],
        )?;
        Ok(())
    }

    pub async fn set_site_sync_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE sites SET sync_enabled = ?1 WHERE id = ?2",
            params![enabled as i32, id],
        )?;
        Ok(rows > 0)
    }
}
