//! HTTP handlers for uploads, file queries and upload settings.
//! Multipart file parts are spooled chunk by chunk into temp files and handed
//! to `UploadService`; nothing holds a whole file in memory. A disabled
//! environment is refused before the body is read, and a part stops spooling
//! as soon as it passes the size ceiling.

use crate::{
    errors::{AppError, UploadError},
    handlers::AppState,
    models::{
        file::{FileRecord, FileSource},
        settings::UploadSettings,
    },
    services::{
        file_builder::{RawUpload, UploadInput, UploadLink},
        hasher,
        persistence::FileQuery,
        upload_service::{SettingsView, UploadOutput},
    },
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::StatusCode,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path as FsPath;
use tokio::{fs::File, io::AsyncWriteExt};
use uuid::Uuid;

const FILES_FIELD: &str = "files";
const FILES_ARRAY_FIELD: &str = "files[]";

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

/// `POST /upload`
pub async fn upload_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadOutput>), AppError> {
    let settings = state.uploads.current_settings().await?;
    if !settings.enabled {
        return Err(UploadError::Disabled.into());
    }

    let mut spooled = Vec::new();
    let form = read_form(&state.tmp_dir, settings.size_limit, multipart, &mut spooled).await;
    let (link, as_array) = match form {
        Ok(form) => form,
        Err(err) => {
            join_all(spooled.iter().map(|u: &RawUpload| u.source.release())).await;
            return Err(err);
        }
    };

    let input = if !as_array && spooled.len() == 1 {
        UploadInput::Single(spooled.remove(0))
    } else {
        UploadInput::Batch(spooled)
    };

    let output = state.uploads.upload(input, &link).await?;
    Ok((StatusCode::OK, Json(output)))
}

/// Walk the form, spooling file parts into `spooled` as they come.
/// Returns the link fields and whether the client asked for an array.
async fn read_form(
    tmp_dir: &FsPath,
    size_limit: f64,
    mut multipart: Multipart,
    spooled: &mut Vec<RawUpload>,
) -> Result<(UploadLink, bool), AppError> {
    let mut link = UploadLink::default();
    let mut as_array = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILES_FIELD | FILES_ARRAY_FIELD => {
                as_array |= name == FILES_ARRAY_FIELD;
                spooled.push(spool(tmp_dir, size_limit, field).await?);
            }
            "refId" => link.ref_id = Some(text(field).await?),
            "ref" => link.ref_type = Some(text(field).await?),
            "source" => link.source = Some(text(field).await?),
            "field" => link.field = Some(text(field).await?),
            "path" => link.path = Some(text(field).await?),
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok((link, as_array))
}

async fn text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))
}

/// Copy one file part to a fresh temp file, giving up once it exceeds
/// `size_limit` KB. `UploadService` repeats the size check on the spooled file.
async fn spool(
    tmp_dir: &FsPath,
    size_limit: f64,
    mut field: Field<'_>,
) -> Result<RawUpload, AppError> {
    let name = field.file_name().unwrap_or("file").to_string();
    let content_type = field.content_type().map(str::to_string);
    let source = FileSource::new(tmp_dir.join(format!("upload-{}.part", Uuid::new_v4())));

    let written = async {
        let mut file = File::create(source.path()).await?;
        let mut written = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| std::io::Error::other(err.body_text()))?
        {
            written += chunk.len() as u64;
            if hasher::to_kb(written) > size_limit {
                break;
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok::<_, std::io::Error>(written)
    }
    .await;

    match written {
        Ok(written) if hasher::to_kb(written) > size_limit => {
            source.release().await;
            return Err(UploadError::SizeLimitExceeded {
                file: name,
                size_kb: hasher::to_kb(written),
                limit_kb: size_limit,
            }
            .into());
        }
        Ok(_) => {}
        Err(err) => {
            source.release().await;
            return Err(AppError::bad_request(format!("could not read {}: {}", name, err)));
        }
    }

    Ok(RawUpload {
        name,
        content_type,
        source,
    })
}

/// `GET /upload/files`
pub async fn find_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.uploads.fetch_all(&query).await?))
}

/// `GET /upload/files/count`
pub async fn count_files(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<CountResponse>, AppError> {
    let count = state.uploads.count(&query).await?;
    Ok(Json(CountResponse { count }))
}

/// `GET /upload/files/{id}`
pub async fn find_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(state.uploads.fetch(id).await?))
}

/// `DELETE /upload/files/{id}`, responding with the removed record.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(state.uploads.remove(id).await?))
}

/// `GET /upload/search/{term}`
pub async fn search_files(
    State(state): State<AppState>,
    Path(term): Path<String>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.uploads.search(&term).await?))
}

/// `GET /upload/settings/{environment}`
pub async fn get_settings(
    State(state): State<AppState>,
    Path(environment): Path<String>,
) -> Result<Json<SettingsView>, AppError> {
    Ok(Json(state.uploads.settings(&environment).await?))
}

/// `PUT /upload/settings/{environment}`, replacing the stored value wholesale.
pub async fn update_settings(
    State(state): State<AppState>,
    Path(environment): Path<String>,
    Json(settings): Json<UploadSettings>,
) -> Result<Json<Value>, AppError> {
    state
        .uploads
        .update_settings(&environment, settings)
        .await?;
    Ok(Json(json!({ "ok": true })))
}
