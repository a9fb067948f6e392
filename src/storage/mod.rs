mod local;
mod object;

use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use axum::{async_trait, body::Bytes};
use futures::stream::BoxStream;
use tokio::io;
use tokio_util::io::StreamReader;

use crate::{config::StorageConfig, models::StorageMethod};

pub use local::LocalStorage;
pub use object::ObjectStorage;

pub type StorageResult<T> = Result<T, StorageError>;

/// Upload stream handed to [`StorageBackend::put`].
pub type UploadBody = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record exists but the bytes are not where the backend keeps them.
    #[error("stored content for `{0}` is missing")]
    Missing(String),
    #[error("invalid storage configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    ObjectStore(#[from] s3::error::S3Error),
}

/// How a download gets fulfilled once the gate allowed it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServePlan {
    /// Stream the file at `path` as an attachment.
    Inline { path: PathBuf },
    /// Send the client to a pre-signed URL valid for `expires_in`.
    Redirect { url: String, expires_in: Duration },
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn method(&self) -> StorageMethod;

    /// Persists the uploaded bytes under `(key, file_name)`.
    async fn put(&self, key: &str, file_name: &str, body: &mut UploadBody) -> StorageResult<()>;

    /// Decides how to serve `(key, file_name)` to a client at `requester`.
    async fn resolve(
        &self,
        key: &str,
        file_name: &str,
        requester: Option<IpAddr>,
    ) -> StorageResult<ServePlan>;

    /// Removes the bytes for `(key, file_name)`. Removing nothing is not an error.
    async fn purge(&self, key: &str, file_name: &str) -> StorageResult<()>;
}

pub async fn from_config(cfg: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match cfg {
        StorageConfig::Local { root } => Arc::new(LocalStorage::new(root).await?),
        StorageConfig::ObjectStore {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            path_style,
            presign_expiry_secs,
        } => Arc::new(ObjectStorage::new(
            bucket,
            region,
            endpoint.as_deref(),
            access_key,
            secret_key,
            *path_style,
            *presign_expiry_secs,
        )?),
    };

    tracing::info!(method = ?backend.method(), "storage backend ready");
    Ok(backend)
}
