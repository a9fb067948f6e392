use axum::{
    body::Body,
    extract::{Path, Query},
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, LOCATION, USER_AGENT},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Extension,
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use tokio::{fs::File, io};
use tokio_util::io::ReaderStream;

use crate::{
    captcha::Verification,
    errors::{AppError, AppResult},
    extractors::ClientIp,
    gate::{self, ClientKind, GateDecision, RejectReason},
    storage::{ServePlan, StorageError},
    sweep::Lease,
    AppContext,
};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// `attachment` disposition with an ASCII fallback and the exact UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    format!(
        r#"attachment; filename="{fallback}"; filename*=UTF-8''{}"#,
        urlencoding::encode(file_name)
    )
}

async fn serve(plan: ServePlan, key: &str, file_name: &str, lease: Lease) -> AppResult<Response> {
    match plan {
        ServePlan::Redirect { url, expires_in } => {
            tracing::info!(%key, expires_in = expires_in.as_secs(), "redirecting to signed url");
            Ok((
                StatusCode::MOVED_PERMANENTLY,
                [(LOCATION, url), (CACHE_CONTROL, NO_CACHE.to_string())],
            )
                .into_response())
        }
        ServePlan::Inline { path } => {
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::Missing(key.to_string()).into())
                }
                Err(e) => return Err(StorageError::Io(e).into()),
            };

            // the lease rides along with the body and is released once it is dropped
            let stream = ReaderStream::new(file).map(move |chunk| {
                let _streaming = &lease;
                chunk
            });

            tracing::info!(%key, "streaming local file");
            Ok((
                [
                    (CONTENT_DISPOSITION, content_disposition(file_name)),
                    (CACHE_CONTROL, NO_CACHE.to_string()),
                ],
                Body::from_stream(stream),
            )
                .into_response())
        }
    }
}

#[tracing::instrument(skip(ctx, ip, headers, query))]
pub async fn download_endpoint(
    ctx: Extension<AppContext>,
    Path((key, file_name)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
) -> AppResult<Response> {
    // taken before the lookup so a sweep can never pull the bytes from under us
    let lease = ctx.leases.acquire(&key);
    let threshold = ctx.cfg.access.download_threshold;

    let record = ctx.records.read(&key).await?;
    let verification = match &record {
        Some(record) if record.is_servable_as(&file_name) && gate::needs_verification(record, threshold) => {
            ctx.verifier.verify(query.token.as_deref(), ip).await
        }
        _ => Verification::NotVerified,
    };

    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let client = ClientKind::from_user_agent(user_agent);

    let now = Utc::now();
    match gate::evaluate(record.as_ref(), &file_name, threshold, verification, client) {
        GateDecision::Reject(RejectReason::InvalidReference) => {
            match &record {
                None => tracing::info!("download of unknown key"),
                Some(record) => tracing::info!(deleted = record.deleted, "download of deleted file or with wrong name"),
            }
            Err(AppError::InvalidReference)
        }
        GateDecision::Reject(RejectReason::TooManyDownloads) => {
            ctx.records.touch(&key, now).await?;
            tracing::info!("download limit reached, not a browser");
            Err(AppError::TooManyDownloads)
        }
        GateDecision::ChallengeRequired => {
            ctx.records.touch(&key, now).await?;
            let page = ctx.pages.challenge(&file_name, &ctx.cfg.access.captcha_site_key)?;
            Ok(page.into_response())
        }
        GateDecision::Allow => {
            let Some(record) = record else {
                return Err(AppError::InvalidReference);
            };
            if record.storage_method != ctx.storage.method() {
                tracing::error!(method = ?record.storage_method, "file was stored with another backend");
                return Err(AppError::ContentMissing(key));
            }

            // only counted once the bytes are known to be there
            let plan = ctx.storage.resolve(&key, &file_name, ip).await?;

            // a concurrent delete between read and here makes this `None`
            let downloads = ctx
                .records
                .record_download(&key, now)
                .await?
                .ok_or(AppError::InvalidReference)?;
            tracing::info!(downloads, "download counted");

            serve(plan, &key, &file_name, lease).await
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(rename = "g-recaptcha-response")]
    token: Option<String>,
}
