//! Error taxonomy and JSON envelope (spec §7).
//!
//! Every error response is `{code, message, ...extra}` with CORS headers
//! attached, matching the non-error response shape from [`crate::router`].

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};

/// Stable error codes surfaced to clients, one per row of spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    MapNotFound,
    ResourceNotFound,
    InvalidMapFile,
    MapShareNotFound,
    DownloadNotFound,
    InvalidRequest,
    InvalidSenderDeviceId,
    Forbidden,
    CancelShareNotCancelable,
    DeclineShareNotPending,
    DeclineCannotConnect,
    DownloadShareNotPending,
    DownloadShareDeclined,
    DownloadShareCanceled,
    DownloadError,
    AbortNotDownloading,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MapNotFound => "MAP_NOT_FOUND",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::InvalidMapFile => "INVALID_MAP_FILE",
            ErrorCode::MapShareNotFound => "MAP_SHARE_NOT_FOUND",
            ErrorCode::DownloadNotFound => "DOWNLOAD_NOT_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidSenderDeviceId => "INVALID_SENDER_DEVICE_ID",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::CancelShareNotCancelable => "CANCEL_SHARE_NOT_CANCELABLE",
            ErrorCode::DeclineShareNotPending => "DECLINE_SHARE_NOT_PENDING",
            ErrorCode::DeclineCannotConnect => "DECLINE_CANNOT_CONNECT",
            ErrorCode::DownloadShareNotPending => "DOWNLOAD_SHARE_NOT_PENDING",
            ErrorCode::DownloadShareDeclined => "DOWNLOAD_SHARE_DECLINED",
            ErrorCode::DownloadShareCanceled => "DOWNLOAD_SHARE_CANCELED",
            ErrorCode::DownloadError => "DOWNLOAD_ERROR",
            ErrorCode::AbortNotDownloading => "ABORT_NOT_DOWNLOADING",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::MapNotFound
            | ErrorCode::ResourceNotFound
            | ErrorCode::MapShareNotFound
            | ErrorCode::DownloadNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidMapFile
            | ErrorCode::InvalidRequest
            | ErrorCode::InvalidSenderDeviceId => StatusCode::BAD_REQUEST,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::CancelShareNotCancelable
            | ErrorCode::DeclineShareNotPending
            | ErrorCode::DownloadShareNotPending
            | ErrorCode::DownloadShareDeclined
            | ErrorCode::DownloadShareCanceled
            | ErrorCode::AbortNotDownloading => StatusCode::CONFLICT,
            ErrorCode::DeclineCannotConnect => StatusCode::BAD_GATEWAY,
            ErrorCode::DownloadError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A structured application error: a stable [`ErrorCode`], a human-readable
/// message, and optional extra JSON fields merged into the envelope.
#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub extra: Map<String, Value>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Render as the `{code, message, ...extra}` JSON body without the
    /// surrounding HTTP response (used when an error is embedded into a
    /// share/download's terminal state rather than returned as an HTTP
    /// response directly).
    pub fn to_json(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("code".to_string(), Value::String(self.code.as_str().to_string()));
        map.insert("message".to_string(), Value::String(self.message.clone()));
        Value::Object(map)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let body = self.to_json();
        let mut resp = (status, Json(body)).into_response();
        resp.headers_mut().insert(
            "Access-Control-Allow-Origin",
            HeaderValue::from_static("*"),
        );
        resp
    }
}

/// Convenience constructors for each taxonomy entry.
macro_rules! ctor {
    ($name:ident, $code:ident) => {
        pub fn $name(message: impl Into<String>) -> AppError {
            AppError::new(ErrorCode::$code, message)
        }
    };
}

ctor!(map_not_found, MapNotFound);
ctor!(resource_not_found, ResourceNotFound);
ctor!(invalid_map_file, InvalidMapFile);
ctor!(map_share_not_found, MapShareNotFound);
ctor!(download_not_found, DownloadNotFound);
ctor!(invalid_request, InvalidRequest);
ctor!(invalid_sender_device_id, InvalidSenderDeviceId);
ctor!(forbidden, Forbidden);
ctor!(cancel_share_not_cancelable, CancelShareNotCancelable);
ctor!(decline_share_not_pending, DeclineShareNotPending);
ctor!(decline_cannot_connect, DeclineCannotConnect);
ctor!(download_share_not_pending, DownloadShareNotPending);
ctor!(download_share_declined, DownloadShareDeclined);
ctor!(download_share_canceled, DownloadShareCanceled);
ctor!(download_error, DownloadError);
ctor!(abort_not_downloading, AbortNotDownloading);

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::new(ErrorCode::Internal, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_contains_code_and_message() {
        let err = map_not_found("slot custom is empty");
        let json = err.to_json();
        assert_eq!(json["code"], "MAP_NOT_FOUND");
        assert_eq!(json["message"], "slot custom is empty");
    }

    #[test]
    fn status_table_matches_spec() {
        assert_eq!(ErrorCode::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::DeclineCannotConnect.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ErrorCode::CancelShareNotCancelable.status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn extra_fields_are_merged() {
        let err = download_error("boom").with_extra("retryable", false);
        let json = err.to_json();
        assert_eq!(json["retryable"], false);
        assert_eq!(json["code"], "DOWNLOAD_ERROR");
    }
}
