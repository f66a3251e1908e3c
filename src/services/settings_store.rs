//! Per-environment upload settings.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{errors::UploadResult, models::settings::UploadSettings};

const STORE_TYPE: &str = "plugin";
const STORE_NAME: &str = "upload";
const STORE_KEY: &str = "provider";

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, environment: &str) -> UploadResult<Option<UploadSettings>>;
    /// Replace the stored settings for `environment` wholesale.
    async fn set(&self, environment: &str, settings: &UploadSettings) -> UploadResult<()>;
}

/// Settings serialized as JSON in the `core_store` table.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    db: Arc<SqlitePool>,
}

impl SqliteSettingsStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, environment: &str) -> UploadResult<Option<UploadSettings>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT value FROM core_store
             WHERE environment = ? AND type = ? AND name = ? AND key = ?",
        )
        .bind(environment)
        .bind(STORE_TYPE)
        .bind(STORE_NAME)
        .bind(STORE_KEY)
        .fetch_optional(&*self.db)
        .await?;

        raw.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(Into::into)
    }

    async fn set(&self, environment: &str, settings: &UploadSettings) -> UploadResult<()> {
        let value = serde_json::to_string(settings)?;
        sqlx::query(
            "INSERT INTO core_store (environment, type, name, key, value)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(environment, type, name, key) DO UPDATE SET value = excluded.value",
        )
        .bind(environment)
        .bind(STORE_TYPE)
        .bind(STORE_NAME)
        .bind(STORE_KEY)
        .bind(value)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}
