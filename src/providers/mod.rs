//! Storage providers: the backends that hold uploaded bytes.
//!
//! Every provider implements [`StorageProvider`] and derives object identity
//! the same way (`[path/]hash + ext`), so switching providers never changes
//! how a file is addressed.
//!
//! - `local`: files under the public directory, always compiled in
//! - `s3`: S3-compatible object storage (feature `provider-s3`)
//! - `cloudinary`: CDN upload API (feature `provider-cloudinary`)
//! - `swift`: OpenStack Swift containers (feature `provider-swift`)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::io;
use thiserror::Error;

use crate::models::file::{FileDescriptor, FileRecord};

#[cfg(feature = "provider-cloudinary")]
pub mod cloudinary;
pub mod local;
#[cfg(any(feature = "provider-s3", feature = "provider-swift"))]
pub mod object_store;
#[cfg(feature = "provider-s3")]
pub mod s3;
#[cfg(feature = "provider-swift")]
pub mod swift;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("invalid provider options: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Upload/delete contract every storage backend fulfils.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stream `file.source` to the backend and set `file.url`
    /// (and `file.provider_metadata` when the backend needs it for deletion).
    async fn upload(&self, file: &mut FileDescriptor) -> ProviderResult<()>;

    /// Remove the stored object. A missing object is `ProviderError::NotFound`.
    async fn delete(&self, file: &FileRecord) -> ProviderResult<()>;
}

/// Deserialize a provider's typed options out of the settings map.
pub fn parse_options<T: DeserializeOwned>(options: &Map<String, Value>) -> ProviderResult<T> {
    serde_json::from_value(Value::Object(options.clone()))
        .map_err(|err| ProviderError::Config(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Opts {
        bucket: String,
        #[serde(default)]
        root: Option<String>,
    }

    #[test]
    fn parses_typed_options() {
        let map = json!({ "bucket": "media" }).as_object().cloned().unwrap();
        let opts: Opts = parse_options(&map).unwrap();
        assert_eq!(opts.bucket, "media");
        assert!(opts.root.is_none());
    }

    #[test]
    fn missing_option_is_config_error() {
        let err = parse_options::<Opts>(&Map::new()).err().unwrap();
        assert!(matches!(err, ProviderError::Config(msg) if msg.contains("bucket")));
    }
}
