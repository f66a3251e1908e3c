pub mod health_handlers;
pub mod upload_handlers;

use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

use crate::services::upload_service::UploadService;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    pub db: Arc<SqlitePool>,
    /// Root served by the local provider; checked by `/readyz`.
    pub public_dir: PathBuf,
    /// Incoming multipart parts are spooled here before the pipeline runs.
    pub tmp_dir: PathBuf,
}
