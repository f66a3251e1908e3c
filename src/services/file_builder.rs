//! Turns raw inbound uploads into `FileDescriptor`s.
//!
//! No storage or datastore I/O happens here; the only reads are the two
//! passes over each temp file (size and digest).

use futures::future::try_join_all;
use std::path::Path;
use uuid::Uuid;

use crate::{
    errors::{UploadError, UploadResult},
    models::file::{FileDescriptor, FileSource, Relation},
    services::hasher,
};

/// A file part as received from the client, already spooled to a temp file.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub name: String,
    pub content_type: Option<String>,
    pub source: FileSource,
}

/// One file or many; responses mirror whichever shape came in.
#[derive(Debug, Clone)]
pub enum UploadInput {
    Single(RawUpload),
    Batch(Vec<RawUpload>),
}

impl UploadInput {
    pub fn is_batch(&self) -> bool {
        matches!(self, UploadInput::Batch(_))
    }

    pub fn into_vec(self) -> Vec<RawUpload> {
        match self {
            UploadInput::Single(file) => vec![file],
            UploadInput::Batch(files) => files,
        }
    }
}

/// Optional fields linking the uploaded files to an owning entity.
#[derive(Debug, Clone, Default)]
pub struct UploadLink {
    pub ref_id: Option<String>,
    pub ref_type: Option<String>,
    pub source: Option<String>,
    pub field: Option<String>,
    pub path: Option<String>,
}

impl UploadLink {
    /// A relation only exists when id, type and field are all known.
    /// Blank form values count as missing.
    pub fn relation(&self) -> Option<Relation> {
        match (present(&self.ref_id), present(&self.ref_type), present(&self.field)) {
            (Some(ref_id), Some(ref_type), Some(field)) => Some(Relation {
                ref_id: ref_id.to_string(),
                ref_type: ref_type.to_string(),
                source: present(&self.source).map(str::to_string),
                field: field.to_string(),
            }),
            _ => None,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Build descriptors for every upload concurrently.
pub async fn build_all(uploads: &[RawUpload], link: &UploadLink) -> UploadResult<Vec<FileDescriptor>> {
    try_join_all(uploads.iter().map(|upload| build(upload, link))).await
}

/// Build the descriptor for a single upload.
pub async fn build(upload: &RawUpload, link: &UploadLink) -> UploadResult<FileDescriptor> {
    let digest_error = |source| UploadError::DigestComputation {
        file: upload.name.clone(),
        source,
    };

    let size = hasher::measure_size(&upload.source)
        .await
        .map_err(digest_error)?;
    let content_digest = hasher::content_digest(&upload.source)
        .await
        .map_err(digest_error)?;

    let ext = extension(&upload.name);
    let mime = upload
        .content_type
        .clone()
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&upload.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    Ok(FileDescriptor {
        name: upload.name.clone(),
        hash: new_hash(),
        content_digest,
        ext,
        mime,
        size_kb: hasher::to_kb(size),
        source: upload.source.clone(),
        related: link.relation().into_iter().collect(),
        path: link.path.clone().filter(|p| !p.is_empty()),
        url: None,
        provider_metadata: None,
        provider: None,
    })
}

/// Random 32-char lowercase hex identifier.
pub fn new_hash() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Extension with its leading dot, as written in the filename.
fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}
