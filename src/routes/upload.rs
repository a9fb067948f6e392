use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    body::Body,
    extract::Path,
    http::{header::CONTENT_LENGTH, HeaderMap},
    Extension, Json,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io;
use tokio_util::io::StreamReader;

use crate::{
    errors::{AppError, AppResult},
    models::StoredFile,
    storage::UploadBody,
    AppContext,
};

const MAX_FILE_NAME_LEN: usize = 255;

fn validate_file_name(file_name: &str) -> AppResult<()> {
    let invalid = file_name.is_empty()
        || file_name.len() > MAX_FILE_NAME_LEN
        || file_name == "."
        || file_name == ".."
        || file_name.chars().any(|c| c == '/' || c == '\\' || c.is_control());

    if invalid {
        return Err(AppError::InvalidFileName);
    }
    Ok(())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Wraps the request body so that reading past `max_bytes` fails.
/// `received` ends up above `max_bytes` only when the limit tripped.
fn limited_body(body: Body, max_bytes: u64, received: Arc<AtomicU64>) -> UploadBody {
    let stream = body.into_data_stream().map(move |chunk| {
        let chunk = chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let len = chunk.len() as u64;
        let total = received.fetch_add(len, Ordering::Relaxed) + len;
        if total > max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "upload exceeds the configured size limit",
            ));
        }
        Ok(chunk)
    });

    StreamReader::new(stream.boxed())
}

async fn handle_upload(
    ctx: &AppContext,
    file_name: String,
    body: &mut UploadBody,
    received: &AtomicU64,
) -> AppResult<UploadResponse> {
    let max_bytes = ctx.cfg.general.max_upload_bytes;
    let delete_key = ctx.keys.new_delete_key();
    let template = StoredFile {
        pending: true,
        ..StoredFile::new(
            String::new(),
            delete_key.clone(),
            file_name.clone(),
            ctx.storage.method(),
            Utc::now(),
        )
    };

    // reserved before the bytes land, rolled back if they don't, and not
    // servable until the final write clears `pending`
    let key = ctx.keys.new_key(&ctx.records, &template).await?;

    if let Err(why) = ctx.storage.put(&key, &file_name, body).await {
        if let Err(rollback) = ctx.records.remove(&key).await {
            tracing::error!(%key, "failed to roll back key reservation: {rollback:?}");
        }
        if let Err(cleanup) = ctx.storage.purge(&key, &file_name).await {
            tracing::warn!(%key, "failed to purge partial upload: {cleanup:?}");
        }

        if received.load(Ordering::Relaxed) > max_bytes {
            tracing::info!(%key, "upload aborted, size limit exceeded");
            return Err(AppError::PayloadTooLarge);
        }
        return Err(why.into());
    }

    let record = StoredFile {
        key: key.clone(),
        file_size: received.load(Ordering::Relaxed) as i64,
        pending: false,
        ..template
    };
    ctx.records.write(&record).await?;
    tracing::info!(%key, bytes = record.file_size, "upload stored");

    let domain = ctx.cfg.general.domain.trim_end_matches('/');
    let encoded_name = urlencoding::encode(&file_name);
    Ok(UploadResponse {
        download_url: format!("{domain}/{key}/{encoded_name}"),
        delete_url: format!("{domain}/{key}/{delete_key}/{encoded_name}"),
    })
}

#[tracing::instrument(skip(ctx, headers, body))]
pub async fn upload_endpoint(
    ctx: Extension<AppContext>,
    Path(file_name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> AppResult<Json<UploadResponse>> {
    validate_file_name(&file_name)?;

    let max_bytes = ctx.cfg.general.max_upload_bytes;
    if declared_length(&headers).is_some_and(|len| len > max_bytes) {
        return Err(AppError::PayloadTooLarge);
    }

    let received = Arc::new(AtomicU64::new(0));
    let mut body = limited_body(body, max_bytes, received.clone());

    let res = handle_upload(&ctx, file_name, &mut body, &received).await?;
    Ok(Json(res))
}

#[derive(Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    #[serde(rename = "deleteURL")]
    pub delete_url: String,
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn file_names_must_be_single_segments() {
        assert!(validate_file_name("report.pdf").is_ok());
        assert!(validate_file_name("with space & ünïcode.txt").is_ok());

        for bad in ["", ".", "..", "a/b", "..\\evil", "line\nbreak"] {
            assert!(matches!(validate_file_name(bad), Err(AppError::InvalidFileName)), "{bad:?}");
        }
        assert!(validate_file_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn reads_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(declared_length(&headers), Some(1024));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), None);
    }
}
