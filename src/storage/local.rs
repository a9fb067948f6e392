use std::{
    net::IpAddr,
    path::{Path, PathBuf},
};

use axum::async_trait;
use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
};

use super::{ServePlan, StorageBackend, StorageError, StorageResult, UploadBody};
use crate::models::StorageMethod;

/// Files on disk, laid out as `{root}/{key}/{file_name}`.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn file_path(&self, key: &str, file_name: &str) -> PathBuf {
        self.root.join(key).join(file_name)
    }

    async fn write_file(path: &Path, body: &mut UploadBody) -> io::Result<()> {
        let mut file = File::create(path).await?;
        io::copy(body, &mut file).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn method(&self) -> StorageMethod {
        StorageMethod::Local
    }

    async fn put(&self, key: &str, file_name: &str, body: &mut UploadBody) -> StorageResult<()> {
        let dir = self.root.join(key);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(file_name);
        if let Err(why) = Self::write_file(&path, body).await {
            if let Err(cleanup) = fs::remove_dir_all(&dir).await {
                tracing::warn!(%key, "failed to remove partial upload: {cleanup:?}");
            }
            return Err(why.into());
        }

        Ok(())
    }

    async fn resolve(
        &self,
        key: &str,
        file_name: &str,
        _requester: Option<IpAddr>,
    ) -> StorageResult<ServePlan> {
        let path = self.file_path(key, file_name);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::Missing(key.to_string()));
        }

        Ok(ServePlan::Inline { path })
    }

    async fn purge(&self, key: &str, _file_name: &str) -> StorageResult<()> {
        match fs::remove_dir_all(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
