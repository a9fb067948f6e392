use axum::{extract::Path, http::StatusCode, Extension};

use crate::{
    errors::{AppError, AppResult},
    sweep::{self, Reclaim},
    AppContext,
};

#[tracing::instrument(skip(ctx, delete_key))]
pub async fn delete_endpoint(
    ctx: Extension<AppContext>,
    Path((key, delete_key, file_name)): Path<(String, String, String)>,
) -> AppResult<StatusCode> {
    // unknown key, wrong name and wrong delete key all look the same from outside
    let record = ctx
        .records
        .read(&key)
        .await?
        .filter(|record| record.is_servable_as(&file_name) && record.delete_key == delete_key)
        .ok_or(AppError::InvalidReference)?;

    if !ctx.records.mark_deleted(&key).await? {
        return Err(AppError::InvalidReference);
    }
    tracing::info!("file deleted");

    if ctx.cfg.sweep.purge_on_delete && record.storage_method == ctx.storage.method() {
        match sweep::reclaim(&ctx.records, ctx.storage.as_ref(), &ctx.leases, &record).await {
            Ok(Reclaim::Done) => {}
            Ok(Reclaim::Busy) => tracing::debug!("file is being downloaded, leaving it to the sweeper"),
            Err(why) => tracing::error!("failed to purge deleted file: {why:?}"),
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
