//! SQLite-backed store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::record::{merge, RecordPatch};
use crate::suggest::SuggestionRecord;
use crate::types::DailyRecord;

use super::{LocalStore, OutboxItem, OutboxStore, SuggestionStore};

/// Database handle (single connection)
pub struct SqliteStore {
    conn: Mutex<Connection>,
    ready: AtomicBool,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            ready: AtomicBool::new(false),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            ready: AtomicBool::new(false),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)?;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Number of days with any recorded content.
    pub fn count_recorded_days(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM daily_records WHERE has_content = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<std::result::Result<DailyRecord, String>> {
        let date: String = row.get("date")?;
        let json: String = row.get("record")?;
        Ok(serde_json::from_str(&json).map_err(|e| format!("{}: {}", date, e)))
    }

    fn row_to_outbox_item(row: &Row) -> rusqlite::Result<(OutboxItem, String)> {
        let patch_json: String = row.get("patch")?;
        let created_at_str: String = row.get("created_at")?;
        let item = OutboxItem {
            id: row.get("id")?,
            date: row.get("date")?,
            patch: RecordPatch::default(),
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        };
        Ok((item, patch_json))
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn wait_for_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.migrate()
    }

    async fn get(&self, date: &str) -> Result<Option<DailyRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT date, record FROM daily_records WHERE date = ?",
                [date],
                Self::row_to_record,
            )
            .optional()?;

        match row {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(Error::Store(format!("corrupt record {}", e))),
            None => Ok(None),
        }
    }

    async fn set(&self, date: &str, record: &DailyRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO daily_records (date, record, has_content, last_modified, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(date) DO UPDATE SET
                record = excluded.record,
                has_content = excluded.has_content,
                last_modified = excluded.last_modified,
                updated_at = excluded.updated_at
            "#,
            params![
                date,
                json,
                record.has_content(),
                record.last_modified.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<DailyRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT date, record FROM daily_records ORDER BY date")?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            match row? {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn enqueue(&self, date: &str, patch: &RecordPatch, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, patch FROM sync_outbox WHERE date = ?",
                [date],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, queued_json)) => {
                let queued: RecordPatch = serde_json::from_str(&queued_json)?;
                let merged = serde_json::to_string(&merge(&queued, patch))?;
                conn.execute(
                    "UPDATE sync_outbox SET patch = ?1, attempts = attempts + 1, last_error = ?2 WHERE id = ?3",
                    params![merged, error, id],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO sync_outbox (date, patch, attempts, last_error, created_at) VALUES (?1, ?2, 1, ?3, ?4)",
                    params![
                        date,
                        serde_json::to_string(patch)?,
                        error,
                        Utc::now().to_rfc3339()
                    ],
                )?;
            }
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<OutboxItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, date, patch, attempts, last_error, created_at FROM sync_outbox ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::row_to_outbox_item)?;

        let mut items = Vec::new();
        for row in rows {
            let (mut item, patch_json) = row?;
            item.patch = serde_json::from_str(&patch_json)?;
            items.push(item);
        }
        Ok(items)
    }

    async fn remove(&self, id: i64, attempts: u32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM sync_outbox WHERE id = ?1 AND attempts = ?2",
            params![id, attempts],
        )?;
        Ok(deleted > 0)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_outbox SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SuggestionStore for SqliteStore {
    async fn save_suggestions(&self, date: &str, record: &SuggestionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO suggestion_records (date, record, generated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(date) DO UPDATE SET
                record = excluded.record,
                generated_at = excluded.generated_at
            "#,
            params![date, json, record.generated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn load_suggestions(&self, date: &str) -> Result<Option<SuggestionRecord>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM suggestion_records WHERE date = ?",
                [date],
                |r| r.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j).map_err(Error::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityLevel, DailyStatus};

    async fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.wait_for_ready().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_record_roundtrip_and_overwrite() {
        let store = store().await;
        assert!(store.get("2024-06-01").await.unwrap().is_none());

        let mut record = DailyRecord::empty("2024-06-01");
        record.activity_level = Some(ActivityLevel::Light);
        store.set("2024-06-01", &record).await.unwrap();

        record.weight = Some(64.2);
        store.set("2024-06-01", &record).await.unwrap();

        let loaded = store.get("2024-06-01").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert_eq!(store.count_recorded_days().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_all_ordered_by_date() {
        let store = store().await;
        for date in ["2024-06-03", "2024-06-01", "2024-06-02"] {
            store.set(date, &DailyRecord::empty(date)).await.unwrap();
        }
        let dates: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec!["2024-06-01", "2024-06-02", "2024-06-03"]);
        // Empty records do not count as recorded days
        assert_eq!(store.count_recorded_days().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_outbox_merges_per_date() {
        let store = store().await;

        let weight = RecordPatch {
            weight: Some(Some(70.0)),
            ..Default::default()
        };
        let status = RecordPatch {
            daily_status: Some(Some(DailyStatus {
                mood: Some(3),
                ..Default::default()
            })),
            ..Default::default()
        };
        store.enqueue("2024-06-01", &weight, "offline").await.unwrap();
        store.enqueue("2024-06-01", &status, "offline again").await.unwrap();
        store.enqueue("2024-06-02", &weight, "offline").await.unwrap();

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].date, "2024-06-01");
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].patch, merge(&weight, &status));
        assert_eq!(pending[0].last_error.as_deref(), Some("offline again"));

        store.mark_failed(pending[1].id, "still offline").await.unwrap();
        // A stale attempt count means the row changed after it was read
        assert!(!store.remove(pending[0].id, 1).await.unwrap());
        assert!(store.remove(pending[0].id, pending[0].attempts).await.unwrap());

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_open_on_disk_creates_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/data.db");
        let store = SqliteStore::open(&path).unwrap();
        store.wait_for_ready().await.unwrap();
        store
            .set("2024-06-01", &DailyRecord::empty("2024-06-01"))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
