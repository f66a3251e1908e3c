//! Represents an uploaded file, before and after it reaches a storage provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{UploadError, UploadResult};

/// Link between an uploaded file and the entity field that owns it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Id of the owning entity.
    pub ref_id: String,

    /// Model (type) of the owning entity.
    #[serde(rename = "ref")]
    pub ref_type: String,

    /// Plugin or collection the model comes from, if any.
    pub source: Option<String>,

    /// Attribute on the owning entity.
    pub field: String,
}

/// Temp file holding the bytes of an inbound upload.
///
/// It can be opened any number of times; every `open` yields a fresh stream
/// positioned at the start.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the temp file. Missing files are fine; other failures are logged.
    pub async fn release(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!(path = %self.path.display(), "released temp upload"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove temp upload"
            ),
        }
    }
}

/// One file travelling through the upload pipeline.
///
/// `hash` is fixed at construction. `url`, `provider_metadata` and `provider`
/// are only written once a storage provider has accepted the bytes.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Original filename.
    pub name: String,

    /// Random identifier naming the stored object.
    pub hash: String,

    /// SHA-256 of the content, URL-safe base64 without padding.
    pub content_digest: String,

    /// Extension including the dot, or empty.
    pub ext: String,

    pub mime: String,

    /// Size in kilobytes (bytes / 1000), two decimals.
    pub size_kb: f64,

    pub source: FileSource,

    pub related: Vec<Relation>,

    /// Optional logical folder the object is stored under.
    pub path: Option<String>,

    pub url: Option<String>,

    pub provider_metadata: Option<Value>,

    pub provider: Option<String>,
}

impl FileDescriptor {
    pub fn object_key(&self) -> String {
        object_key(self.path.as_deref(), &self.hash, &self.ext)
    }
}

/// Metadata row for a file that a provider has stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub name: String,
    pub hash: String,
    pub content_digest: String,
    pub ext: String,
    pub mime: String,
    /// Size in kilobytes.
    pub size: f64,
    pub url: String,
    pub path: Option<String>,
    pub provider: String,
    pub provider_metadata: Option<Value>,
    pub related: Vec<Relation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn object_key(&self) -> String {
        object_key(self.path.as_deref(), &self.hash, &self.ext)
    }
}

/// Fields needed to create a `FileRecord`.
#[derive(Clone, Debug)]
pub struct NewFileRecord {
    pub name: String,
    pub hash: String,
    pub content_digest: String,
    pub ext: String,
    pub mime: String,
    pub size: f64,
    pub url: String,
    pub path: Option<String>,
    pub provider: String,
    pub provider_metadata: Option<Value>,
    pub related: Vec<Relation>,
}

impl TryFrom<&FileDescriptor> for NewFileRecord {
    type Error = UploadError;

    /// Only descriptors a provider has completed can be persisted.
    fn try_from(file: &FileDescriptor) -> UploadResult<Self> {
        let (Some(url), Some(provider)) = (file.url.clone(), file.provider.clone()) else {
            return Err(UploadError::Incomplete {
                file: file.name.clone(),
            });
        };

        Ok(Self {
            name: file.name.clone(),
            hash: file.hash.clone(),
            content_digest: file.content_digest.clone(),
            ext: file.ext.clone(),
            mime: file.mime.clone(),
            size: file.size_kb,
            url,
            path: file.path.clone(),
            provider,
            provider_metadata: file.provider_metadata.clone(),
            related: file.related.clone(),
        })
    }
}

/// Object key shared by every provider: `[path/]hash + ext`.
pub fn object_key(path: Option<&str>, hash: &str, ext: &str) -> String {
    match path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}{}", prefix, hash, ext),
        None => format!("{}{}", hash, ext),
    }
}
