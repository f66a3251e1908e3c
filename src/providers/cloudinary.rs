//! Cloudinary CDN provider.
//!
//! Uploads stream the file body through a signed multipart request; the
//! returned `public_id`/`resource_type` pair is kept as provider metadata
//! because `destroy` needs both.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Body, Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use super::{ProviderError, ProviderResult, StorageProvider, parse_options};
use crate::{
    models::file::{FileDescriptor, FileRecord, object_key},
    services::{hasher::ReopenableSource, registry::ProviderContext},
};

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudinaryOptions {
    cloud_name: String,
    api_key: String,
    api_secret: String,
    #[serde(default = "default_folder")]
    folder: String,
    #[serde(default = "default_api_base")]
    api_base: String,
}

fn default_folder() -> String {
    "samples".into()
}

fn default_api_base() -> String {
    "https://api.cloudinary.com/v1_1".into()
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
    public_id: String,
    resource_type: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

pub struct CloudinaryProvider {
    client: Client,
    opts: CloudinaryOptions,
}

pub fn init(
    _ctx: &ProviderContext,
    options: &Map<String, Value>,
) -> ProviderResult<Arc<dyn StorageProvider>> {
    let opts: CloudinaryOptions = parse_options(options)?;
    if opts.cloud_name.is_empty() || opts.api_key.is_empty() || opts.api_secret.is_empty() {
        return Err(ProviderError::Config(
            "cloudName, apiKey and apiSecret are required".into(),
        ));
    }
    Ok(Arc::new(CloudinaryProvider {
        client: Client::new(),
        opts,
    }))
}

/// Hex SHA-256 over the alphabetically sorted `k=v` pairs followed by the secret.
fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{}{}", joined, secret)))
}

impl CloudinaryProvider {
    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.opts.api_base.trim_end_matches('/'),
            self.opts.cloud_name,
            resource_type,
            action
        )
    }

    async fn api_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(body) => ProviderError::Backend(format!("{}: {}", status, body.error.message)),
            Err(_) => ProviderError::Backend(format!("cloudinary responded {}", status)),
        }
    }
}

#[async_trait]
impl StorageProvider for CloudinaryProvider {
    /// The `public_id` is the object key without its extension; Cloudinary appends the format.
    async fn upload(&self, file: &mut FileDescriptor) -> ProviderResult<()> {
        let public_id = object_key(file.path.as_deref(), &file.hash, "");
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[
                ("folder", self.opts.folder.as_str()),
                ("public_id", public_id.as_str()),
                ("timestamp", timestamp.as_str()),
            ],
            &self.opts.api_secret,
        );

        let stream = file.source.open().await?;
        let part = Part::stream(Body::wrap_stream(stream))
            .file_name(format!("{}{}", file.hash, file.ext))
            .mime_str(&file.mime)?;
        let form = Form::new()
            .text("api_key", self.opts.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.opts.folder.clone())
            .text("public_id", public_id)
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("auto", "upload"))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let uploaded: UploadResponse = response.json().await?;

        debug!(public_id = %uploaded.public_id, "uploaded to cloudinary");
        file.url = Some(uploaded.secure_url);
        file.provider_metadata = Some(json!({
            "public_id": uploaded.public_id,
            "resource_type": uploaded.resource_type,
        }));
        Ok(())
    }

    async fn delete(&self, file: &FileRecord) -> ProviderResult<()> {
        let metadata = file.provider_metadata.as_ref();
        let public_id = metadata
            .and_then(|m| m.get("public_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Backend(format!("`{}` has no cloudinary public_id", file.name))
            })?;
        let resource_type = metadata
            .and_then(|m| m.get("resource_type"))
            .and_then(Value::as_str)
            .unwrap_or("image");

        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[
                ("invalidate", "true"),
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
            ],
            &self.opts.api_secret,
        );
        let params = [
            ("public_id", public_id),
            ("invalidate", "true"),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.opts.api_key.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let destroyed: DestroyResponse = response.json().await?;
        match destroyed.result.as_str() {
            "ok" => Ok(()),
            "not found" => Err(ProviderError::NotFound {
                key: public_id.to_string(),
            }),
            other => Err(ProviderError::Backend(format!("destroy returned `{}`", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::FileSource;
    use axum::{
        Json, Router,
        extract::{Form as FormExtract, Multipart, Path, State},
        routing::post,
    };
    use std::{collections::HashMap, path::PathBuf, sync::Mutex};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    const SECRET: &str = "shh";

    #[derive(Clone, Default)]
    struct FakeCdn {
        stored: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    async fn fake_upload(
        State(cdn): State<FakeCdn>,
        Path(cloud): Path<String>,
        mut multipart: Multipart,
    ) -> Json<Value> {
        let mut fields = HashMap::new();
        let mut body = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                body = field.bytes().await.unwrap().to_vec();
            } else {
                fields.insert(name, field.text().await.unwrap());
            }
        }
        let expected = sign(
            &[
                ("folder", fields["folder"].as_str()),
                ("public_id", fields["public_id"].as_str()),
                ("timestamp", fields["timestamp"].as_str()),
            ],
            SECRET,
        );
        assert_eq!(fields["signature"], expected);
        assert_eq!(fields["api_key"], "key");

        let public_id = format!("{}/{}", fields["folder"], fields["public_id"]);
        cdn.stored.lock().unwrap().insert(public_id.clone(), body);
        Json(json!({
            "secure_url": format!("https://res.example.com/{}/image/upload/{}", cloud, public_id),
            "public_id": public_id,
            "resource_type": "image",
        }))
    }

    async fn fake_destroy(
        State(cdn): State<FakeCdn>,
        FormExtract(params): FormExtract<HashMap<String, String>>,
    ) -> Json<Value> {
        assert_eq!(params["invalidate"], "true");
        let removed = cdn.stored.lock().unwrap().remove(&params["public_id"]);
        let result = if removed.is_some() { "ok" } else { "not found" };
        Json(json!({ "result": result }))
    }

    async fn spawn_fake() -> (FakeCdn, String) {
        let cdn = FakeCdn::default();
        let app = Router::new()
            .route("/{cloud}/auto/upload", post(fake_upload))
            .route("/{cloud}/image/destroy", post(fake_destroy))
            .with_state(cdn.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (cdn, format!("http://{}", addr))
    }

    fn provider(api_base: &str) -> Arc<dyn StorageProvider> {
        let options = json!({
            "cloudName": "demo",
            "apiKey": "key",
            "apiSecret": SECRET,
            "apiBase": api_base,
        });
        let ctx = ProviderContext {
            public_dir: PathBuf::from("public"),
        };
        init(&ctx, options.as_object().unwrap()).unwrap()
    }

    #[test]
    fn signature_sorts_parameters() {
        let a = sign(&[("timestamp", "1"), ("folder", "x")], "s");
        let b = sign(&[("folder", "x"), ("timestamp", "1")], "s");
        assert_eq!(a, b);
        assert_eq!(a, hex::encode(Sha256::digest("folder=x&timestamp=1s")));
    }

    #[test]
    fn init_requires_credentials() {
        let ctx = ProviderContext {
            public_dir: PathBuf::from("public"),
        };
        let options = json!({ "cloudName": "demo", "apiKey": "", "apiSecret": "x" });
        assert!(init(&ctx, options.as_object().unwrap()).is_err());
    }

    #[tokio::test]
    async fn upload_then_delete_against_fake_api() {
        let (cdn, base) = spawn_fake().await;
        let provider = provider(&base);

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("part");
        tokio::fs::write(&src, b"image bytes").await.unwrap();
        let mut file = FileDescriptor {
            name: "cat.png".into(),
            hash: "abcd".into(),
            content_digest: "d".into(),
            ext: ".png".into(),
            mime: "image/png".into(),
            size_kb: 0.01,
            source: FileSource::new(src),
            related: Vec::new(),
            path: None,
            url: None,
            provider_metadata: None,
            provider: None,
        };

        provider.upload(&mut file).await.unwrap();
        assert_eq!(
            file.url.as_deref(),
            Some("https://res.example.com/demo/image/upload/samples/abcd")
        );
        assert_eq!(
            cdn.stored.lock().unwrap().get("samples/abcd").map(Vec::as_slice),
            Some(&b"image bytes"[..])
        );

        let record = FileRecord {
            id: Uuid::new_v4(),
            name: file.name.clone(),
            hash: file.hash.clone(),
            content_digest: file.content_digest.clone(),
            ext: file.ext.clone(),
            mime: file.mime.clone(),
            size: file.size_kb,
            url: file.url.clone().unwrap(),
            path: None,
            provider: "cloudinary".into(),
            provider_metadata: file.provider_metadata.clone(),
            related: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        provider.delete(&record).await.unwrap();
        assert!(cdn.stored.lock().unwrap().is_empty());

        let err = provider.delete(&record).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }
}
