//! S3 and S3-compatible object storage (AWS, MinIO, R2, Spaces).

use opendal::{Operator, layers::LoggingLayer, services::S3};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{
    ProviderError, ProviderResult, StorageProvider, object_store::OperatorProvider, parse_options,
};
use crate::services::registry::ProviderContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3Options {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    /// Public URL prefix, e.g. a CDN in front of the bucket.
    base_url: Option<String>,
    root: Option<String>,
}

pub fn init(
    _ctx: &ProviderContext,
    options: &Map<String, Value>,
) -> ProviderResult<Arc<dyn StorageProvider>> {
    let opts: S3Options = parse_options(options)?;

    let mut builder = S3::default().bucket(&opts.bucket).region(&opts.region);
    if let Some(endpoint) = opts.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder.endpoint(endpoint);
    }
    match (&opts.access_key_id, &opts.secret_access_key) {
        (Some(key_id), Some(secret)) => {
            builder = builder.access_key_id(key_id).secret_access_key(secret);
        }
        (None, None) => {}
        _ => {
            return Err(ProviderError::Config(
                "accessKeyId and secretAccessKey must be set together".into(),
            ));
        }
    }
    if let Some(root) = opts.root.as_deref() {
        builder = builder.root(root);
    }

    let operator = Operator::new(builder)?
        .layer(LoggingLayer::default())
        .finish();

    Ok(Arc::new(OperatorProvider::new("s3", operator, public_base(&opts))))
}

/// Where stored objects can be fetched from.
fn public_base(opts: &S3Options) -> String {
    if let Some(base) = opts.base_url.as_deref().filter(|b| !b.is_empty()) {
        return base.to_string();
    }
    let root = opts
        .root
        .as_deref()
        .map(|r| r.trim_matches('/'))
        .filter(|r| !r.is_empty())
        .map(|r| format!("/{}", r))
        .unwrap_or_default();
    match opts.endpoint.as_deref().filter(|e| !e.is_empty()) {
        Some(endpoint) => format!("{}/{}{}", endpoint.trim_end_matches('/'), opts.bucket, root),
        None => format!(
            "https://{}.s3.{}.amazonaws.com{}",
            opts.bucket, opts.region, root
        ),
    }
}
