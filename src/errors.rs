use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid filename, key, or file is deleted.")]
    InvalidReference,
    #[error("This file has been downloaded too many times, visit the URL with a browser.")]
    TooManyDownloads,
    #[error("Upload too large.")]
    PayloadTooLarge,
    #[error("Oops, looks like the file you tried uploading has an invalid name! Change the name and try again.")]
    InvalidFileName,

    #[error("Storage is unavailable right now! Please try again later.")]
    BackendUnavailable(#[source] StorageError),
    #[error("Something went wrong on our side! Please try again later.")]
    ContentMissing(String),
    #[error("Something went wrong on our side! Please try again later.")]
    KeySpaceExhausted { attempts: u32 },
    #[error("Something went wrong on our side! Please try again later.")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidReference => StatusCode::NOT_FOUND,
            Self::TooManyDownloads => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidFileName => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ContentMissing(_) | Self::KeySpaceExhausted { .. } | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidReference => "invalid-reference",
            Self::TooManyDownloads => "too-many-downloads",
            Self::PayloadTooLarge => "payload-too-large",
            Self::InvalidFileName => "invalid-file-name",
            Self::BackendUnavailable(_) => "backend-unavailable",
            Self::ContentMissing(_) => "content-missing",
            Self::KeySpaceExhausted { .. } | Self::Other(_) => "other",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status();

        match &self {
            Self::ContentMissing(key) => {
                tracing::error!(%key, "record exists but its bytes are gone from local storage");
            }
            Self::BackendUnavailable(why) => tracing::error!("storage backend failure: {why:?}"),
            _ if code.is_server_error() => tracing::error!("{self:?}"),
            _ => {}
        }

        let res = ErrorResponse {
            error_code: self.error_code().to_string(),
            error: self.to_string(),
        };
        (code, Json(res)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Missing(key) => Self::ContentMissing(key),
            other => Self::BackendUnavailable(other),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        Self::Other(value.into())
    }
}

impl From<minijinja::Error> for AppError {
    fn from(value: minijinja::Error) -> Self {
        Self::Other(value.into())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: String,
    pub error: String,
}
