//! S3-compatible object storage.
//!
//! Downloads never pass through this server: `resolve` presigns a short-lived
//! GET URL and the client is redirected to it.

use std::{collections::HashMap, net::IpAddr, time::Duration};

use axum::async_trait;
use s3::{creds::Credentials, Bucket, Region};

use super::{ServePlan, StorageBackend, StorageError, StorageResult, UploadBody};
use crate::models::StorageMethod;

/// Signed query parameter carrying the address the URL was minted for.
pub const REQUESTER_IP_PARAM: &str = "x-requester-ip";

pub struct ObjectStorage {
    bucket: Box<Bucket>,
    presign_expiry_secs: u32,
}

impl ObjectStorage {
    pub fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
        presign_expiry_secs: u32,
    ) -> StorageResult<Self> {
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(format!("object store credentials: {e}")))?;

        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com")),
        };

        let mut bucket = Bucket::new(bucket, region, credentials)?;
        if path_style {
            bucket.set_path_style();
        }

        Ok(Self {
            bucket,
            presign_expiry_secs,
        })
    }

    fn object_path(key: &str, file_name: &str) -> String {
        format!("{key}/{file_name}")
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn method(&self) -> StorageMethod {
        StorageMethod::ObjectStore
    }

    async fn put(&self, key: &str, file_name: &str, body: &mut UploadBody) -> StorageResult<()> {
        let path = Self::object_path(key, file_name);
        self.bucket.put_object_stream(body, &path).await?;
        tracing::debug!(%path, bucket = %self.bucket.name(), "object stored");
        Ok(())
    }

    async fn resolve(
        &self,
        key: &str,
        file_name: &str,
        requester: Option<IpAddr>,
    ) -> StorageResult<ServePlan> {
        let path = Self::object_path(key, file_name);

        // the address is part of the signed query, changing it breaks the signature
        let queries = requester.map(|ip| {
            HashMap::from([(REQUESTER_IP_PARAM.to_string(), ip.to_string())])
        });

        let url = self
            .bucket
            .presign_get(&path, self.presign_expiry_secs, queries)
            .await?;

        Ok(ServePlan::Redirect {
            url,
            expires_in: Duration::from_secs(self.presign_expiry_secs.into()),
        })
    }

    async fn purge(&self, key: &str, file_name: &str) -> StorageResult<()> {
        self.bucket
            .delete_object(Self::object_path(key, file_name))
            .await?;
        Ok(())
    }
}
