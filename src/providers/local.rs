//! Local filesystem provider.
//!
//! Objects live under `<public_dir>/<uploadDir>/<key>` and are served from
//! `/<uploadDir>/<key>`. Writes go to a temp file beside the target and are
//! renamed into place once synced.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use super::{ProviderError, ProviderResult, StorageProvider, parse_options};
use crate::{
    models::file::{FileDescriptor, FileRecord},
    services::{hasher::ReopenableSource, registry::ProviderContext},
};

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalOptions {
    #[serde(default = "default_upload_dir")]
    upload_dir: String,
}

fn default_upload_dir() -> String {
    "uploads".into()
}

#[derive(Debug, Clone)]
pub struct LocalProvider {
    upload_dir: String,
    base_path: PathBuf,
}

pub fn init(
    ctx: &ProviderContext,
    options: &Map<String, Value>,
) -> ProviderResult<Arc<dyn StorageProvider>> {
    let opts: LocalOptions = parse_options(options)?;
    Ok(Arc::new(LocalProvider::new(&ctx.public_dir, opts.upload_dir)?))
}

impl LocalProvider {
    pub fn new(public_dir: &Path, upload_dir: impl Into<String>) -> ProviderResult<Self> {
        let upload_dir = upload_dir.into().trim_matches('/').to_string();
        if upload_dir.is_empty() || upload_dir.contains("..") {
            return Err(ProviderError::Config(format!(
                "uploadDir `{}` must be a relative folder name",
                upload_dir
            )));
        }
        Ok(Self {
            base_path: public_dir.join(&upload_dir),
            upload_dir,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Reject keys that could escape the upload directory.
    fn ensure_key_safe(key: &str) -> ProviderResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key.bytes().any(|b| b.is_ascii_control() || b == b'\\');
        if unsafe_key {
            return Err(ProviderError::Backend(format!("invalid object key `{}`", key)));
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Remove empty directories between `start` and the upload root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    async fn upload(&self, file: &mut FileDescriptor) -> ProviderResult<()> {
        let key = file.object_key();
        Self::ensure_key_safe(&key)?;

        let target = self.object_path(&key);
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            ProviderError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_stream(file, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &target).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(path = %target.display(), "stored object on local disk");
        file.url = Some(format!("/{}/{}", self.upload_dir, key));
        Ok(())
    }

    async fn delete(&self, file: &FileRecord) -> ProviderResult<()> {
        let key = file.object_key();
        Self::ensure_key_safe(&key)?;

        let path = self.object_path(&key);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NotFound { key });
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

async fn write_stream(file: &FileDescriptor, tmp_path: &Path) -> ProviderResult<()> {
    let mut out = File::create(tmp_path).await?;
    let mut stream = file.source.open().await?;
    while let Some(chunk) = stream.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}
