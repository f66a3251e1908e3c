//! OpenDAL-backed provider shared by the S3 and Swift variants.
//!
//! The variants only differ in how the operator is built and how public
//! URLs are formed; streaming and deletion live here.

use async_trait::async_trait;
use futures::StreamExt;
use opendal::{ErrorKind, Operator};
use tracing::debug;

use super::{ProviderError, ProviderResult, StorageProvider};
use crate::{
    models::file::{FileDescriptor, FileRecord},
    services::hasher::ReopenableSource,
};

impl From<opendal::Error> for ProviderError {
    fn from(err: opendal::Error) -> Self {
        ProviderError::Backend(err.to_string())
    }
}

pub struct OperatorProvider {
    label: &'static str,
    operator: Operator,
    public_base: String,
}

impl OperatorProvider {
    pub fn new(label: &'static str, operator: Operator, public_base: impl Into<String>) -> Self {
        Self {
            label,
            operator,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[async_trait]
impl StorageProvider for OperatorProvider {
    async fn upload(&self, file: &mut FileDescriptor) -> ProviderResult<()> {
        let key = file.object_key();
        let mut stream = file.source.open().await?;
        let mut writer = self
            .operator
            .writer_with(&key)
            .content_type(&file.mime)
            .await?;

        while let Some(chunk) = stream.next().await {
            let written = match chunk {
                Ok(bytes) => writer.write(bytes).await.map_err(ProviderError::from),
                Err(err) => Err(ProviderError::Io(err)),
            };
            if let Err(err) = written {
                if let Err(abort_err) = writer.abort().await {
                    debug!(backend = self.label, key = %key, error = %abort_err, "abort failed");
                }
                return Err(err);
            }
        }
        writer.close().await?;

        debug!(backend = self.label, key = %key, "stored object");
        file.url = Some(self.public_url(&key));
        Ok(())
    }

    async fn delete(&self, file: &FileRecord) -> ProviderResult<()> {
        let key = file.object_key();
        // deleting a missing key succeeds silently, so stat first
        match self.operator.stat(&key).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NotFound { key });
            }
            Err(err) => return Err(err.into()),
        }
        self.operator.delete(&key).await?;
        debug!(backend = self.label, key = %key, "deleted object");
        Ok(())
    }
}
