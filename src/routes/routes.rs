//! Defines routes for the upload API.
//!
//! ## Structure
//! - **Upload**
//!   - `POST   /upload` — multipart upload (`files` parts + link fields)
//!
//! - **File metadata**
//!   - `GET    /upload/files` — list (`_limit`, `_start`, `_sort`, filters)
//!   - `GET    /upload/files/count` — count with the same filters
//!   - `GET    /upload/files/{id}` — one record
//!   - `DELETE /upload/files/{id}` — delete object and record
//!   - `GET    /upload/search/{term}` — substring search on name or hash
//!
//! - **Settings**
//!   - `GET    /upload/settings/{environment}` — installed providers + config
//!   - `PUT    /upload/settings/{environment}` — replace config

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    upload_handlers::{
        count_files, delete_file, find_file, find_files, get_settings, search_files,
        update_settings, upload_files,
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for every upload endpoint, carrying `AppState`.
///
/// The upload route has no body limit; size is enforced per file against the
/// configured `sizeLimit` while each part is spooled, and again by the
/// upload service.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/files", get(find_files))
        .route("/upload/files/count", get(count_files))
        .route("/upload/files/{id}", get(find_file).delete(delete_file))
        .route("/upload/search/{term}", get(search_files))
        .route(
            "/upload/settings/{environment}",
            get(get_settings).put(update_settings),
        )
}
