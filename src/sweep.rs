use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    errors::AppResult, models::StoredFile, repository::RecordStore, storage::StorageBackend,
};

/// Counts downloads currently streaming per key.
#[derive(Clone, Default)]
pub struct ServeLeases {
    active: Arc<Mutex<HashMap<String, usize>>>,
}

/// Held for as long as a download of `key` is in flight.
pub struct Lease {
    key: String,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

impl ServeLeases {
    pub fn acquire(&self, key: &str) -> Lease {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active.entry(key.to_string()).or_default() += 1;
        Lease {
            key: key.to_string(),
            active: self.active.clone(),
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.contains_key(key)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = active.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    Done,
    /// A download is still streaming, try again on the next pass.
    Busy,
}

/// Removes the bytes and the record of a file that is no longer servable.
///
/// The record is flagged deleted first so no new download can start, then
/// in-flight downloads are waited out across passes.
pub async fn reclaim(
    records: &RecordStore,
    storage: &dyn StorageBackend,
    leases: &ServeLeases,
    record: &StoredFile,
) -> AppResult<Reclaim> {
    if !record.deleted && records.mark_deleted(&record.key).await? {
        tracing::info!(key = %record.key, "expired file marked deleted");
    }

    if leases.is_active(&record.key) {
        return Ok(Reclaim::Busy);
    }

    storage.purge(&record.key, &record.file_name).await?;
    records.remove(&record.key).await?;
    tracing::info!(key = %record.key, bytes = record.file_size, "file reclaimed");

    Ok(Reclaim::Done)
}

/// One pass over every record. Returns how many files were reclaimed.
pub async fn sweep_once(
    records: &RecordStore,
    storage: &dyn StorageBackend,
    leases: &ServeLeases,
    now: DateTime<Utc>,
    expire_after: Option<Duration>,
) -> AppResult<usize> {
    let mut reclaimed = 0;

    for record in records.list().await? {
        if !record.should_reclaim(now, expire_after) {
            continue;
        }
        // the bytes may live elsewhere if the storage method changed since upload
        if record.storage_method != storage.method() {
            tracing::warn!(key = %record.key, method = ?record.storage_method, "skipping file stored with another backend");
            continue;
        }

        match reclaim(records, storage, leases, &record).await {
            Ok(Reclaim::Done) => reclaimed += 1,
            Ok(Reclaim::Busy) => tracing::debug!(key = %record.key, "file is being downloaded, reclaim postponed"),
            Err(why) => tracing::error!(key = %record.key, "failed to reclaim file: {why:?}"),
        }
    }

    Ok(reclaimed)
}

pub async fn run(
    records: RecordStore,
    storage: Arc<dyn StorageBackend>,
    leases: ServeLeases,
    every: StdDuration,
    expire_after: Option<Duration>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_once(&records, storage.as_ref(), &leases, Utc::now(), expire_after).await {
            Ok(0) => tracing::trace!("sweep found nothing to reclaim"),
            Ok(n) => tracing::info!("sweep reclaimed {n} files"),
            Err(why) => tracing::error!("sweep failed: {why:?}"),
        }
    }
}
