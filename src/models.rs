use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "kebab-case")]
pub enum StorageMethod {
    Local,
    ObjectStore,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredFile {
    pub key: String,
    pub delete_key: String,
    pub file_name: String,
    pub file_size: i64,
    pub storage_method: StorageMethod,
    pub upload_time: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub downloads: i64,
    pub deleted: bool,
    /// Set while the bytes of a reserved key are still being written.
    pub pending: bool,
}

impl StoredFile {
    /// A fresh, never downloaded record. `key` is filled in by the key generator.
    pub fn new(
        key: String,
        delete_key: String,
        file_name: String,
        storage_method: StorageMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            delete_key,
            file_name,
            file_size: 0,
            storage_method,
            upload_time: now,
            last_access: now,
            downloads: 0,
            deleted: false,
            pending: false,
        }
    }

    pub fn is_servable_as(&self, file_name: &str) -> bool {
        !self.deleted && !self.pending && self.file_name == file_name
    }

    pub fn is_expired(&self, now: DateTime<Utc>, expire_after: Option<Duration>) -> bool {
        match expire_after {
            Some(max_idle) => now - self.last_access >= max_idle,
            None => false,
        }
    }

    /// Whether the sweeper may physically reclaim this record and its bytes.
    pub fn should_reclaim(&self, now: DateTime<Utc>, expire_after: Option<Duration>) -> bool {
        self.deleted || self.is_expired(now, expire_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(now: DateTime<Utc>) -> StoredFile {
        StoredFile::new(
            "k".into(),
            "d".into(),
            "a.txt".into(),
            StorageMethod::Local,
            now,
        )
    }

    #[test]
    fn servable_requires_exact_name_and_not_deleted() {
        let mut sf = record(Utc::now());
        assert!(sf.is_servable_as("a.txt"));
        assert!(!sf.is_servable_as("A.txt"));
        assert!(!sf.is_servable_as("a.txt "));

        sf.deleted = true;
        assert!(!sf.is_servable_as("a.txt"));
    }

    #[test]
    fn pending_upload_is_not_servable() {
        let mut sf = record(Utc::now());
        sf.pending = true;
        assert!(!sf.is_servable_as("a.txt"));

        sf.pending = false;
        assert!(sf.is_servable_as("a.txt"));
    }

    #[test]
    fn reclaim_on_delete_or_idle() {
        let now = Utc::now();
        let mut sf = record(now - Duration::days(10));

        assert!(!sf.should_reclaim(now, None));
        assert!(!sf.should_reclaim(now, Some(Duration::days(30))));
        assert!(sf.should_reclaim(now, Some(Duration::days(7))));

        sf.last_access = now;
        assert!(!sf.should_reclaim(now, Some(Duration::days(7))));
        sf.deleted = true;
        assert!(sf.should_reclaim(now, Some(Duration::days(7))));
    }
}
