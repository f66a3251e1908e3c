//! OpenStack Swift containers (Rackspace Cloud Files and friends).

use opendal::{Operator, layers::LoggingLayer, services::Swift};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{ProviderResult, StorageProvider, object_store::OperatorProvider, parse_options};
use crate::services::registry::ProviderContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwiftOptions {
    /// Account endpoint, e.g. `https://storage.example.com/v1/AUTH_acct`.
    endpoint: String,
    container: String,
    token: Option<String>,
    /// CDN URI of the container, when it is published.
    public_url: Option<String>,
    root: Option<String>,
}

pub fn init(
    _ctx: &ProviderContext,
    options: &Map<String, Value>,
) -> ProviderResult<Arc<dyn StorageProvider>> {
    let opts: SwiftOptions = parse_options(options)?;

    let mut builder = Swift::default()
        .endpoint(&opts.endpoint)
        .container(&opts.container);
    if let Some(token) = opts.token.as_deref() {
        builder = builder.token(token);
    }
    if let Some(root) = opts.root.as_deref() {
        builder = builder.root(root);
    }

    let operator = Operator::new(builder)?
        .layer(LoggingLayer::default())
        .finish();

    Ok(Arc::new(OperatorProvider::new(
        "swift",
        operator,
        public_base(&opts),
    )))
}

fn public_base(opts: &SwiftOptions) -> String {
    let root = opts
        .root
        .as_deref()
        .map(|r| r.trim_matches('/'))
        .filter(|r| !r.is_empty())
        .map(|r| format!("/{}", r))
        .unwrap_or_default();
    match opts.public_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => format!("{}{}", url.trim_end_matches('/'), root),
        None => format!(
            "{}/{}{}",
            opts.endpoint.trim_end_matches('/'),
            opts.container,
            root
        ),
    }
}
