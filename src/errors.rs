use crate::providers::ProviderError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::{fmt, io};
use thiserror::Error;
use uuid::Uuid;

/// Everything the upload pipeline can fail with.
///
/// Validation variants are raised before any provider or datastore side effect.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File upload is disabled")]
    Disabled,
    #[error("Files are empty")]
    EmptyPayload,
    #[error("{file} file is bigger than limit size!")]
    SizeLimitExceeded {
        file: String,
        size_kb: f64,
        limit_kb: f64,
    },
    #[error(
        "The provider `{name}` isn't installed. Rebuild with the `provider-{name}` feature enabled"
    )]
    ProviderNotFound { name: String },
    #[error("provider `{provider}` failed to initialize: {reason}")]
    ProviderInit { provider: String, reason: String },
    #[error("upload of `{file}` failed: {source}")]
    UploadTransport {
        file: String,
        #[source]
        source: ProviderError,
    },
    #[error("delete of `{file}` failed: {source}")]
    DeleteTransport {
        file: String,
        #[source]
        source: ProviderError,
    },
    #[error("could not hash `{file}`: {source}")]
    DigestComputation {
        file: String,
        #[source]
        source: io::Error,
    },
    #[error("provider did not assign a url to `{file}`")]
    Incomplete { file: String },
    #[error("file `{0}` not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    #[error(transparent)]
    Settings(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    /// Stable identifier clients can switch on.
    pub fn id(&self) -> &'static str {
        match self {
            UploadError::Disabled => "Upload.status.disabled",
            UploadError::EmptyPayload => "Upload.status.empty",
            UploadError::SizeLimitExceeded { .. } => "Upload.status.sizeLimit",
            UploadError::ProviderNotFound { .. } => "Upload.provider.notInstalled",
            UploadError::ProviderInit { .. } => "Upload.provider.init",
            UploadError::UploadTransport { .. } => "Upload.transport.upload",
            UploadError::DeleteTransport { .. } => "Upload.transport.delete",
            UploadError::DigestComputation { .. } => "Upload.status.digest",
            UploadError::Incomplete { .. } => "Upload.status.incomplete",
            UploadError::NotFound(_) => "file.notFound",
            UploadError::Persistence(_) | UploadError::Settings(_) | UploadError::Io(_) => {
                "Upload.internal"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::Disabled
            | UploadError::EmptyPayload
            | UploadError::SizeLimitExceeded { .. } => StatusCode::BAD_REQUEST,
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::UploadTransport { .. } | UploadError::DeleteTransport { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn values(&self) -> Option<Value> {
        match self {
            UploadError::SizeLimitExceeded {
                file,
                size_kb,
                limit_kb,
            } => Some(json!({ "file": file, "size": size_kb, "limit": limit_kb })),
            UploadError::UploadTransport { file, .. }
            | UploadError::DeleteTransport { file, .. }
            | UploadError::DigestComputation { file, .. }
            | UploadError::Incomplete { file } => Some(json!({ "file": file })),
            UploadError::ProviderNotFound { name } => Some(json!({ "provider": name })),
            UploadError::ProviderInit { provider, .. } => Some(json!({ "provider": provider })),
            _ => None,
        }
    }
}

/// The single error shape returned by every endpoint.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub id: Option<&'static str>,
    pub values: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            id: None,
            values: None,
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let Some(id) = self.id {
            body["id"] = json!(id);
        }
        if let Some(values) = self.values {
            body["values"] = values;
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "upload request failed");
        }
        Self {
            status,
            id: Some(err.id()),
            values: err.values(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_maps_to_bad_request_with_file_name() {
        let err = AppError::from(UploadError::SizeLimitExceeded {
            file: "big.bin".into(),
            size_kb: 12.5,
            limit_kb: 10.0,
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.id, Some("Upload.status.sizeLimit"));
        assert_eq!(err.message, "big.bin file is bigger than limit size!");
        assert_eq!(err.values.unwrap()["file"], "big.bin");
    }

    #[test]
    fn missing_provider_names_the_feature() {
        let err = UploadError::ProviderNotFound {
            name: "s3".into(),
        };
        assert!(err.to_string().contains("provider-s3"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError::from(UploadError::NotFound(Uuid::nil()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.id, Some("file.notFound"));
    }
}
