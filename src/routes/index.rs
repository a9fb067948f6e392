use axum::{response::Html, Extension};

use crate::{errors::AppResult, AppContext};

pub async fn index_endpoint(ctx: Extension<AppContext>) -> AppResult<Html<String>> {
    let page = ctx.pages.index(
        ctx.cfg.general.domain.trim_end_matches('/'),
        ctx.cfg.general.max_upload_bytes,
        ctx.cfg.access.download_threshold,
    )?;
    Ok(page)
}
