use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::StoredFile;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stored_files (
    key            TEXT PRIMARY KEY NOT NULL,
    delete_key     TEXT NOT NULL,
    file_name      TEXT NOT NULL,
    file_size      INTEGER NOT NULL DEFAULT 0,
    storage_method TEXT NOT NULL,
    upload_time    TEXT NOT NULL,
    last_access    TEXT NOT NULL,
    downloads      INTEGER NOT NULL DEFAULT 0,
    deleted        BOOLEAN NOT NULL DEFAULT FALSE,
    pending        BOOLEAN NOT NULL DEFAULT FALSE
)
"#;

/// Key-value store of [`StoredFile`] records.
///
/// Counter and flag updates are single statements, so concurrent requests on
/// the same key never lose an increment.
#[derive(Clone)]
pub struct RecordStore {
    db: SqlitePool,
}

impl RecordStore {
    pub async fn connect(url: &str, max_connections: u32) -> sqlx::Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { db };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> sqlx::Result<()> {
        sqlx::query(SCHEMA).execute(&self.db).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stored_files WHERE key = ?)")
            .bind(key)
            .fetch_one(&self.db)
            .await
    }

    pub async fn read(&self, key: &str) -> sqlx::Result<Option<StoredFile>> {
        sqlx::query_as("SELECT * FROM stored_files WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
    }

    /// Full-record upsert. Identity columns are kept from the first write,
    /// `downloads` never goes down, `deleted` never goes back to false and a
    /// finished upload never becomes pending again.
    pub async fn write(&self, record: &StoredFile) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stored_files
                (key, delete_key, file_name, file_size, storage_method, upload_time, last_access, downloads, deleted, pending)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                file_size   = excluded.file_size,
                last_access = excluded.last_access,
                downloads   = MAX(stored_files.downloads, excluded.downloads),
                deleted     = stored_files.deleted OR excluded.deleted,
                pending     = stored_files.pending AND excluded.pending
            "#,
        )
        .bind(&record.key)
        .bind(&record.delete_key)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(record.storage_method)
        .bind(record.upload_time)
        .bind(record.last_access)
        .bind(record.downloads)
        .bind(record.deleted)
        .bind(record.pending)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Atomically inserts `record` unless its key is already taken.
    pub async fn insert_if_absent(&self, record: &StoredFile) -> sqlx::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO stored_files
                (key, delete_key, file_name, file_size, storage_method, upload_time, last_access, downloads, deleted, pending)
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&record.key)
        .bind(&record.delete_key)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(record.storage_method)
        .bind(record.upload_time)
        .bind(record.last_access)
        .bind(record.downloads)
        .bind(record.deleted)
        .bind(record.pending)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Counts one served download. Returns the new count, or `None` when the
    /// record is gone, deleted or still being uploaded.
    pub async fn record_download(&self, key: &str, at: DateTime<Utc>) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar(
            r#"
            UPDATE stored_files
            SET downloads = downloads + 1, last_access = ?
            WHERE key = ? AND deleted = FALSE AND pending = FALSE
            RETURNING downloads
            "#,
        )
        .bind(at)
        .bind(key)
        .fetch_optional(&self.db)
        .await
    }

    pub async fn touch(&self, key: &str, at: DateTime<Utc>) -> sqlx::Result<()> {
        sqlx::query("UPDATE stored_files SET last_access = ? WHERE key = ?")
            .bind(at)
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Returns true only for the call that flipped the flag.
    pub async fn mark_deleted(&self, key: &str) -> sqlx::Result<bool> {
        let res = sqlx::query("UPDATE stored_files SET deleted = TRUE WHERE key = ? AND deleted = FALSE")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn remove(&self, key: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM stored_files WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> sqlx::Result<Vec<StoredFile>> {
        sqlx::query_as("SELECT * FROM stored_files ORDER BY upload_time")
            .fetch_all(&self.db)
            .await
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> RecordStore {
    // a single connection, every new connection would open an empty database
    RecordStore::connect("sqlite::memory:", 1).await.unwrap()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::StorageMethod;

    fn sample(key: &str) -> StoredFile {
        StoredFile::new(
            key.into(),
            "delete-me".into(),
            "a.txt".into(),
            StorageMethod::Local,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let store = memory_store().await;
        assert!(store.read("nope").await.unwrap().is_none());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn insert_if_absent_reserves_once() {
        let store = memory_store().await;
        let first = sample("K1");
        let mut second = sample("K1");
        second.delete_key = "other".into();

        assert!(store.insert_if_absent(&first).await.unwrap());
        assert!(!store.insert_if_absent(&second).await.unwrap());

        let stored = store.read("K1").await.unwrap().unwrap();
        assert_eq!(stored.delete_key, "delete-me");
    }

    #[tokio::test]
    async fn write_keeps_counters_monotonic() {
        let store = memory_store().await;
        let mut record = sample("K1");
        record.downloads = 5;
        record.deleted = true;
        store.write(&record).await.unwrap();

        record.downloads = 2;
        record.deleted = false;
        record.file_size = 42;
        record.delete_key = "forged".into();
        store.write(&record).await.unwrap();

        let stored = store.read("K1").await.unwrap().unwrap();
        assert_eq!(stored.downloads, 5);
        assert!(stored.deleted);
        assert_eq!(stored.file_size, 42);
        assert_eq!(stored.delete_key, "delete-me");
    }

    #[tokio::test]
    async fn record_download_increments_and_skips_deleted() {
        let store = memory_store().await;
        let record = sample("K1");
        store.write(&record).await.unwrap();

        let later = record.last_access + Duration::minutes(5);
        assert_eq!(store.record_download("K1", later).await.unwrap(), Some(1));
        assert_eq!(store.record_download("K1", later).await.unwrap(), Some(2));

        let stored = store.read("K1").await.unwrap().unwrap();
        assert_eq!(stored.last_access, later);

        assert!(store.mark_deleted("K1").await.unwrap());
        assert!(!store.mark_deleted("K1").await.unwrap());
        assert_eq!(store.record_download("K1", later).await.unwrap(), None);
        assert_eq!(store.record_download("missing", later).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pending_reservation_is_not_counted_until_finalized() {
        let store = memory_store().await;
        let mut record = sample("K1");
        record.pending = true;
        assert!(store.insert_if_absent(&record).await.unwrap());
        assert_eq!(store.record_download("K1", Utc::now()).await.unwrap(), None);

        record.pending = false;
        record.file_size = 10;
        store.write(&record).await.unwrap();
        assert_eq!(store.record_download("K1", Utc::now()).await.unwrap(), Some(1));

        // a stale writer cannot turn a finished upload back into a reservation
        record.pending = true;
        store.write(&record).await.unwrap();
        assert!(!store.read("K1").await.unwrap().unwrap().pending);
    }

    #[tokio::test]
    async fn concurrent_downloads_are_not_lost() {
        let store = memory_store().await;
        store.write(&sample("K1")).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.record_download("K1", Utc::now()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.read("K1").await.unwrap().unwrap();
        assert_eq!(stored.downloads, 20);
    }

    #[tokio::test]
    async fn remove_and_list() {
        let store = memory_store().await;
        store.write(&sample("K1")).await.unwrap();
        store.write(&sample("K2")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.remove("K1").await.unwrap();
        let keys: Vec<_> = store.list().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["K2".to_string()]);
    }
}
