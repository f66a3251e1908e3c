//! UploadService: drives files from the request to a storage provider and
//! the metadata store.
//!
//! Upload: validate → build descriptors → check sizes → resolve provider →
//! per file (concurrently) upload → persist → emit `media.create`.
//! Delete: find record → resolve provider → emit `media.delete` → provider
//! delete (same provider only) → remove record.
//!
//! A record persisted after a provider upload is the only durable trace of the
//! remote object. If persistence fails the object stays behind; nothing rolls
//! it back.

use futures::future::join_all;
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::{UploadError, UploadResult},
    models::{
        file::{FileDescriptor, FileRecord, NewFileRecord},
        settings::UploadSettings,
    },
    providers::StorageProvider,
    services::{
        events::{EventHub, MediaEventKind},
        file_builder::{self, RawUpload, UploadInput, UploadLink},
        persistence::{FileQuery, FileRepository},
        registry::{ProviderContext, ProviderRegistry, ProviderSummary},
        settings_store::SettingsStore,
    },
};

/// Where a single upload is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Received,
    Validated,
    Buffered,
    Stored,
    Persisted,
    Completed,
    Failed,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStage::Received => "received",
            UploadStage::Validated => "validated",
            UploadStage::Buffered => "buffered",
            UploadStage::Stored => "stored",
            UploadStage::Persisted => "persisted",
            UploadStage::Completed => "completed",
            UploadStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Response shape mirrors the request: one file in, one record out.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UploadOutput {
    Single(FileRecord),
    Batch(Vec<FileRecord>),
}

impl UploadOutput {
    pub fn into_vec(self) -> Vec<FileRecord> {
        match self {
            UploadOutput::Single(record) => vec![record],
            UploadOutput::Batch(records) => records,
        }
    }
}

/// Settings as returned by the settings endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsView {
    pub providers: Vec<ProviderSummary>,
    pub config: UploadSettings,
}

struct ActiveProvider {
    settings: UploadSettings,
    instance: Arc<dyn StorageProvider>,
}

impl ActiveProvider {
    fn matches(&self, settings: &UploadSettings) -> bool {
        self.settings.provider == settings.provider
            && self.settings.provider_options == settings.provider_options
    }
}

#[derive(Clone)]
pub struct UploadService {
    registry: Arc<ProviderRegistry>,
    ctx: ProviderContext,
    files: Arc<dyn FileRepository>,
    settings: Arc<dyn SettingsStore>,
    events: EventHub,
    environment: String,
    defaults: UploadSettings,
    active: Arc<RwLock<Option<ActiveProvider>>>,
}

impl UploadService {
    /// Build the service and initialize the default provider.
    ///
    /// A default provider that is missing or fails to initialize is fatal;
    /// providers selected later through settings are initialized on first use.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ctx: ProviderContext,
        files: Arc<dyn FileRepository>,
        settings: Arc<dyn SettingsStore>,
        events: EventHub,
        environment: impl Into<String>,
        defaults: UploadSettings,
    ) -> UploadResult<Self> {
        let instance = registry
            .get(&defaults.provider)?
            .init(&ctx, &defaults.provider_options)?;
        info!(provider = %defaults.provider, "initialized default storage provider");

        Ok(Self {
            registry,
            ctx,
            files,
            settings,
            events,
            environment: environment.into(),
            active: Arc::new(RwLock::new(Some(ActiveProvider {
                settings: defaults.clone(),
                instance,
            }))),
            defaults,
        })
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Settings for the service's own environment, falling back to startup defaults.
    pub async fn current_settings(&self) -> UploadResult<UploadSettings> {
        Ok(self
            .settings
            .get(&self.environment)
            .await?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    /// Provider instance for `settings`, re-initialized only when the
    /// configured name or options change.
    async fn resolve_provider(
        &self,
        settings: &UploadSettings,
    ) -> UploadResult<Arc<dyn StorageProvider>> {
        if let Some(active) = self.active.read().await.as_ref() {
            if active.matches(settings) {
                return Ok(active.instance.clone());
            }
        }

        let mut slot = self.active.write().await;
        if let Some(active) = slot.as_ref() {
            if active.matches(settings) {
                return Ok(active.instance.clone());
            }
        }
        let instance = self
            .registry
            .get(&settings.provider)?
            .init(&self.ctx, &settings.provider_options)?;
        info!(provider = %settings.provider, "initialized storage provider");
        *slot = Some(ActiveProvider {
            settings: settings.clone(),
            instance: instance.clone(),
        });
        Ok(instance)
    }

    /// Upload one or many files. Temp sources are released on every path.
    pub async fn upload(&self, input: UploadInput, link: &UploadLink) -> UploadResult<UploadOutput> {
        let is_batch = input.is_batch();
        let uploads = input.into_vec();

        let outcome = self.upload_all(&uploads, link).await;
        join_all(uploads.iter().map(|u| u.source.release())).await;

        let records = outcome?;
        if is_batch {
            return Ok(UploadOutput::Batch(records));
        }
        records
            .into_iter()
            .next()
            .map(UploadOutput::Single)
            .ok_or(UploadError::EmptyPayload)
    }

    async fn upload_all(
        &self,
        uploads: &[RawUpload],
        link: &UploadLink,
    ) -> UploadResult<Vec<FileRecord>> {
        debug!(files = uploads.len(), stage = %UploadStage::Received, "upload request");
        let settings = self.current_settings().await?;
        if !settings.enabled {
            return Err(UploadError::Disabled);
        }
        if uploads.is_empty() {
            return Err(UploadError::EmptyPayload);
        }
        debug!(stage = %UploadStage::Validated, "upload request");

        let files = file_builder::build_all(uploads, link).await?;
        debug!(stage = %UploadStage::Buffered, "upload request");

        // the whole batch is rejected before any byte reaches a provider
        if let Some(file) = files.iter().find(|f| f.size_kb > settings.size_limit) {
            return Err(UploadError::SizeLimitExceeded {
                file: file.name.clone(),
                size_kb: file.size_kb,
                limit_kb: settings.size_limit,
            });
        }

        let provider = self.resolve_provider(&settings).await?;
        let results = join_all(
            files
                .into_iter()
                .map(|file| self.store_one(file, provider.clone(), &settings.provider)),
        )
        .await;

        results.into_iter().collect()
    }

    /// Upload, persist and announce one file, then release its temp source.
    async fn store_one(
        &self,
        mut file: FileDescriptor,
        provider: Arc<dyn StorageProvider>,
        provider_name: &str,
    ) -> UploadResult<FileRecord> {
        let outcome = self.store_and_persist(&mut file, provider, provider_name).await;
        file.source.release().await;

        match &outcome {
            Ok(record) => {
                info!(id = %record.id, name = %record.name, url = %record.url, stage = %UploadStage::Completed, "file uploaded")
            }
            Err(err) => {
                warn!(name = %file.name, error = %err, stage = %UploadStage::Failed, "file upload failed")
            }
        }
        outcome
    }

    async fn store_and_persist(
        &self,
        file: &mut FileDescriptor,
        provider: Arc<dyn StorageProvider>,
        provider_name: &str,
    ) -> UploadResult<FileRecord> {
        provider
            .upload(file)
            .await
            .map_err(|source| UploadError::UploadTransport {
                file: file.name.clone(),
                source,
            })?;
        file.provider = Some(provider_name.to_string());
        debug!(name = %file.name, key = %file.object_key(), stage = %UploadStage::Stored, "upload");

        let record = match self.files.create(NewFileRecord::try_from(&*file)?).await {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    name = %file.name,
                    url = file.url.as_deref().unwrap_or_default(),
                    provider = provider_name,
                    "metadata not saved; stored object left without a record"
                );
                return Err(err.into());
            }
        };
        debug!(id = %record.id, stage = %UploadStage::Persisted, "upload");

        self.events.emit(MediaEventKind::Create, &record);
        Ok(record)
    }

    /// Delete a file: provider object first, then its record.
    ///
    /// Files stored by a different provider than the active one keep their
    /// remote object; only the record is removed.
    pub async fn remove(&self, id: Uuid) -> UploadResult<FileRecord> {
        let record = self
            .files
            .find_one(id)
            .await?
            .ok_or(UploadError::NotFound(id))?;
        let settings = self.current_settings().await?;

        if record.provider == settings.provider {
            let provider = self.resolve_provider(&settings).await?;
            self.events.emit(MediaEventKind::Delete, &record);
            provider
                .delete(&record)
                .await
                .map_err(|source| UploadError::DeleteTransport {
                    file: record.name.clone(),
                    source,
                })?;
            debug!(id = %id, provider = %record.provider, "provider object deleted");
        } else {
            warn!(
                id = %id,
                recorded = %record.provider,
                active = %settings.provider,
                "skipping provider delete for file stored by another provider"
            );
            self.events.emit(MediaEventKind::Delete, &record);
        }

        self.files
            .delete(id)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    pub async fn fetch(&self, id: Uuid) -> UploadResult<FileRecord> {
        self.files
            .find_one(id)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    pub async fn fetch_all(&self, query: &FileQuery) -> UploadResult<Vec<FileRecord>> {
        Ok(self.files.find(query).await?)
    }

    pub async fn count(&self, query: &FileQuery) -> UploadResult<i64> {
        Ok(self.files.count(query).await?)
    }

    pub async fn search(&self, term: &str) -> UploadResult<Vec<FileRecord>> {
        Ok(self.files.search(term).await?)
    }

    pub async fn settings(&self, environment: &str) -> UploadResult<SettingsView> {
        let config = self
            .settings
            .get(environment)
            .await?
            .unwrap_or_else(|| self.defaults.clone());
        Ok(SettingsView {
            providers: self.registry.list(),
            config,
        })
    }

    /// Replace an environment's settings. The provider must be installed.
    pub async fn update_settings(
        &self,
        environment: &str,
        settings: UploadSettings,
    ) -> UploadResult<()> {
        self.registry.get(&settings.provider)?;
        self.settings.set(environment, &settings).await?;
        info!(environment, provider = %settings.provider, "upload settings replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::file::FileSource,
        providers::{self, ProviderError, ProviderResult},
        services::{
            hasher,
            persistence::{PersistenceResult, SqliteFileRepository},
            registry::ProviderRegistration,
            settings_store::SqliteSettingsStore,
        },
    };
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use sqlx::SqlitePool;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider double that records object keys instead of storing bytes.
    #[derive(Default)]
    struct RecordingProvider {
        uploads: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
        fail_uploads: bool,
    }

    impl RecordingProvider {
        fn uploads(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }

        fn deletes(&self) -> Vec<String> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StorageProvider for RecordingProvider {
        async fn upload(&self, file: &mut FileDescriptor) -> ProviderResult<()> {
            if self.fail_uploads {
                return Err(ProviderError::Backend("connection reset".into()));
            }
            let key = file.object_key();
            self.uploads.lock().unwrap().push(key.clone());
            file.url = Some(format!("mock://{}", key));
            Ok(())
        }

        async fn delete(&self, file: &FileRecord) -> ProviderResult<()> {
            self.deletes.lock().unwrap().push(file.object_key());
            Ok(())
        }
    }

    fn register(name: &str, provider: Arc<RecordingProvider>) -> ProviderRegistration {
        ProviderRegistration::new(name, name, move |_, _| {
            Ok(provider.clone() as Arc<dyn StorageProvider>)
        })
    }

    /// Repository that refuses every insert and otherwise behaves normally.
    struct RejectingRepository {
        inner: SqliteFileRepository,
    }

    #[async_trait]
    impl FileRepository for RejectingRepository {
        async fn create(&self, _: NewFileRecord) -> PersistenceResult<FileRecord> {
            Err(sqlx::Error::RowNotFound)
        }

        async fn find_one(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>> {
            self.inner.find_one(id).await
        }

        async fn find(&self, query: &FileQuery) -> PersistenceResult<Vec<FileRecord>> {
            self.inner.find(query).await
        }

        async fn count(&self, query: &FileQuery) -> PersistenceResult<i64> {
            self.inner.count(query).await
        }

        async fn search(&self, term: &str) -> PersistenceResult<Vec<FileRecord>> {
            self.inner.search(term).await
        }

        async fn delete(&self, id: Uuid) -> PersistenceResult<Option<FileRecord>> {
            self.inner.delete(id).await
        }
    }

    struct Harness {
        service: UploadService,
        mock: Arc<RecordingProvider>,
        s3: Arc<RecordingProvider>,
        settings: Arc<SqliteSettingsStore>,
        public: TempDir,
        incoming: TempDir,
    }

    impl Harness {
        async fn new(defaults: UploadSettings) -> Self {
            Self::try_new(defaults).await.unwrap()
        }

        async fn try_new(defaults: UploadSettings) -> UploadResult<Self> {
            Self::with_files(defaults, |pool| Arc::new(SqliteFileRepository::new(pool))).await
        }

        async fn with_files(
            defaults: UploadSettings,
            files: impl FnOnce(Arc<SqlitePool>) -> Arc<dyn FileRepository>,
        ) -> UploadResult<Self> {
            let mock = Arc::new(RecordingProvider::default());
            let s3 = Arc::new(RecordingProvider::default());
            let broken = Arc::new(RecordingProvider {
                fail_uploads: true,
                ..RecordingProvider::default()
            });
            let registry = ProviderRegistry::builder()
                .register(ProviderRegistration::new(
                    "local",
                    "Local server",
                    providers::local::init,
                ))
                .register(register("mock", mock.clone()))
                .register(register("s3", s3.clone()))
                .register(register("flaky", broken))
                .register(ProviderRegistration::new("misconfigured", "x", |_, _| {
                    Err(ProviderError::Config("missing credentials".into()))
                }))
                .register({
                    let mock = mock.clone();
                    ProviderRegistration::new("picky", "picky", move |_, options| {
                        if options.contains_key("broken") {
                            return Err(ProviderError::Config("broken options".into()));
                        }
                        Ok(mock.clone() as Arc<dyn StorageProvider>)
                    })
                })
                .build();

            let pool = db::memory_pool().await.unwrap();
            let files = files(pool.clone());
            let settings = Arc::new(SqliteSettingsStore::new(pool));
            let public = tempfile::tempdir().unwrap();
            let incoming = tempfile::tempdir().unwrap();

            let service = UploadService::new(
                Arc::new(registry),
                ProviderContext {
                    public_dir: public.path().to_path_buf(),
                },
                files,
                settings.clone(),
                EventHub::new(),
                "test",
                defaults,
            )?;
            Ok(Self {
                service,
                mock,
                s3,
                settings,
                public,
                incoming,
            })
        }

        async fn raw(&self, name: &str, bytes: &[u8], content_type: Option<&str>) -> RawUpload {
            let path = self.incoming.path().join(format!("{}.part", Uuid::new_v4()));
            tokio::fs::write(&path, bytes).await.unwrap();
            RawUpload {
                name: name.into(),
                content_type: content_type.map(str::to_string),
                source: FileSource::new(path),
            }
        }

        async fn use_settings(&self, settings: UploadSettings) {
            self.settings.set("test", &settings).await.unwrap();
        }

        fn incoming_is_empty(&self) -> bool {
            std::fs::read_dir(self.incoming.path()).unwrap().next().is_none()
        }

        async fn count(&self) -> i64 {
            self.service.count(&FileQuery::default()).await.unwrap()
        }
    }

    fn settings(provider: &str, size_limit: f64) -> UploadSettings {
        UploadSettings {
            provider: provider.into(),
            provider_options: Map::new(),
            size_limit,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn oversized_file_never_reaches_provider() {
        let h = Harness::new(settings("mock", 1.0)).await;
        let big = h.raw("big.bin", &[0u8; 2000], None).await;

        let err = h
            .service
            .upload(UploadInput::Single(big), &UploadLink::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::SizeLimitExceeded { ref file, .. } if file == "big.bin"));
        assert!(h.mock.uploads().is_empty());
        assert_eq!(h.count().await, 0);
        assert!(h.incoming_is_empty());
    }

    #[tokio::test]
    async fn batch_with_one_oversized_file_is_rejected_whole() {
        let h = Harness::new(settings("mock", 1.0)).await;
        let batch = vec![
            h.raw("one.txt", b"small", None).await,
            h.raw("two.bin", &[1u8; 5000], None).await,
            h.raw("three.txt", b"small too", None).await,
        ];

        let err = h
            .service
            .upload(UploadInput::Batch(batch), &UploadLink::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::SizeLimitExceeded { ref file, .. } if file == "two.bin"));
        assert!(h.mock.uploads().is_empty());
        assert_eq!(h.count().await, 0);
        assert!(h.incoming_is_empty());
    }

    #[tokio::test]
    async fn local_image_upload_follows_url_convention() {
        let h = Harness::new(UploadSettings::default()).await;
        let bytes = b"\xff\xd8\xff\xe0 fake jpeg payload";
        let upload = h.raw("rec.jpg", bytes, Some("image/jpeg")).await;
        let expected_digest = hasher::content_digest(&upload.source).await.unwrap();

        let output = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap();

        let UploadOutput::Single(record) = output else {
            panic!("single upload must return a single record");
        };
        assert_eq!(record.provider, "local");
        assert_eq!(record.mime, "image/jpeg");
        assert_eq!(record.ext, ".jpg");
        assert_eq!(record.content_digest, expected_digest);
        assert_eq!(record.url, format!("/uploads/{}.jpg", record.hash));

        let stored = h.public.path().join(format!("uploads/{}.jpg", record.hash));
        assert_eq!(tokio::fs::read(stored).await.unwrap(), bytes);
        assert!(h.incoming_is_empty());

        let json = serde_json::to_value(&record).unwrap();
        for key in ["hash", "contentDigest", "url", "provider", "mime"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn same_bytes_share_a_digest_but_not_a_hash() {
        let h = Harness::new(settings("mock", 100.0)).await;
        let batch = vec![
            h.raw("a.txt", b"identical", None).await,
            h.raw("b.txt", b"identical", None).await,
        ];

        let records = h
            .service
            .upload(UploadInput::Batch(batch), &UploadLink::default())
            .await
            .unwrap()
            .into_vec();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a.txt");
        assert_eq!(records[1].name, "b.txt");
        assert_eq!(records[0].content_digest, records[1].content_digest);
        assert_ne!(records[0].hash, records[1].hash);
        assert_eq!(h.mock.uploads().len(), 2);
    }

    #[tokio::test]
    async fn upload_then_delete_removes_object_and_record() {
        let h = Harness::new(settings("mock", 100.0)).await;
        let mut events = h.service.events().subscribe();
        let link = UploadLink {
            ref_id: Some("3".into()),
            ref_type: Some("article".into()),
            field: Some("cover".into()),
            path: Some("covers".into()),
            ..UploadLink::default()
        };
        let upload = h.raw("cover.png", b"png", None).await;

        let record = match h.service.upload(UploadInput::Single(upload), &link).await.unwrap() {
            UploadOutput::Single(record) => record,
            UploadOutput::Batch(_) => panic!("expected single"),
        };
        assert_eq!(record.related.len(), 1);
        assert_eq!(h.mock.uploads(), vec![format!("covers/{}.png", record.hash)]);

        let removed = h.service.remove(record.id).await.unwrap();

        assert_eq!(removed.id, record.id);
        assert_eq!(h.mock.deletes(), vec![format!("covers/{}.png", record.hash)]);
        assert!(matches!(
            h.service.fetch(record.id).await,
            Err(UploadError::NotFound(_))
        ));

        let created = events.recv().await.unwrap();
        assert_eq!(created.event, MediaEventKind::Create);
        let deleted = events.recv().await.unwrap();
        assert_eq!(deleted.event, MediaEventKind::Delete);
        assert_eq!(deleted.media.id, record.id);
    }

    #[tokio::test]
    async fn delete_skips_provider_for_files_from_another_provider() {
        let h = Harness::new(UploadSettings::default()).await;
        let upload = h.raw("old.txt", b"stored locally", None).await;
        let record = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap()
            .into_vec()
            .remove(0);
        assert_eq!(record.provider, "local");

        h.use_settings(settings("s3", 100.0)).await;
        let removed = h.service.remove(record.id).await.unwrap();

        assert_eq!(removed.id, record.id);
        assert!(h.s3.deletes().is_empty());
        assert_eq!(h.count().await, 0);
        // the local object is left behind
        let stored = h.public.path().join(format!("uploads/{}.txt", record.hash));
        assert!(stored.exists());
    }

    #[tokio::test]
    async fn disabled_or_empty_requests_are_rejected() {
        let h = Harness::new(settings("mock", 100.0)).await;
        assert!(matches!(
            h.service
                .upload(UploadInput::Batch(Vec::new()), &UploadLink::default())
                .await,
            Err(UploadError::EmptyPayload)
        ));

        let mut disabled = settings("mock", 100.0);
        disabled.enabled = false;
        h.use_settings(disabled).await;
        let upload = h.raw("a.txt", b"x", None).await;
        assert!(matches!(
            h.service
                .upload(UploadInput::Single(upload), &UploadLink::default())
                .await,
            Err(UploadError::Disabled)
        ));
        assert!(h.incoming_is_empty());
        assert!(h.mock.uploads().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_names_file_and_saves_nothing() {
        let h = Harness::new(settings("mock", 100.0)).await;
        h.use_settings(settings("flaky", 100.0)).await;
        let upload = h.raw("report.pdf", b"%PDF", None).await;

        let err = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UploadTransport { ref file, .. } if file == "report.pdf"));
        assert!(err.to_string().contains("report.pdf"));
        assert_eq!(h.count().await, 0);
        assert!(h.incoming_is_empty());
    }

    #[tokio::test]
    async fn default_provider_failure_is_fatal_but_alternates_are_lazy() {
        assert!(matches!(
            Harness::try_new(settings("misconfigured", 100.0)).await,
            Err(UploadError::ProviderInit { .. })
        ));
        assert!(matches!(
            Harness::try_new(settings("ftp", 100.0)).await,
            Err(UploadError::ProviderNotFound { .. })
        ));

        let h = Harness::new(settings("mock", 100.0)).await;
        h.use_settings(settings("misconfigured", 100.0)).await;
        let upload = h.raw("a.txt", b"x", None).await;
        let err = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ProviderInit { ref provider, .. } if provider == "misconfigured"));
        assert!(h.incoming_is_empty());
    }

    #[tokio::test]
    async fn removing_unknown_file_is_not_found() {
        let h = Harness::new(settings("mock", 100.0)).await;
        let id = Uuid::new_v4();
        assert!(matches!(h.service.remove(id).await, Err(UploadError::NotFound(missing)) if missing == id));
        assert!(h.mock.deletes().is_empty());
    }

    #[tokio::test]
    async fn settings_round_trip_and_reject_unknown_providers() {
        let h = Harness::new(settings("mock", 100.0)).await;

        let view = h.service.settings("production").await.unwrap();
        assert_eq!(view.config.provider, "mock");
        assert!(view.providers.iter().any(|p| p.name == "s3"));

        h.service
            .update_settings("production", settings("s3", 10.0))
            .await
            .unwrap();
        assert_eq!(
            h.service.settings("production").await.unwrap().config.size_limit,
            10.0
        );
        assert!(matches!(
            h.service.update_settings("production", settings("ftp", 1.0)).await,
            Err(UploadError::ProviderNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn search_finds_uploaded_files() {
        let h = Harness::new(settings("mock", 100.0)).await;
        let upload = h.raw("Quarterly-Report.pdf", b"%PDF", None).await;
        h.service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap();

        assert_eq!(h.service.search("quarterly").await.unwrap().len(), 1);
        assert!(h.service.search("annual").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_keeps_stored_object_and_releases_temp_file() {
        let h = Harness::with_files(settings("mock", 100.0), |pool| {
            Arc::new(RejectingRepository {
                inner: SqliteFileRepository::new(pool),
            })
        })
        .await
        .unwrap();
        let mut events = h.service.events().subscribe();
        let upload = h.raw("orphan.txt", b"bytes", None).await;

        let err = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Persistence(_)));
        assert_eq!(h.mock.uploads().len(), 1);
        assert!(h.mock.deletes().is_empty());
        assert!(h.incoming_is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_provider_init_on_delete_announces_nothing() {
        let h = Harness::new(settings("picky", 100.0)).await;
        let upload = h.raw("keep.txt", b"keep", None).await;
        let record = h
            .service
            .upload(UploadInput::Single(upload), &UploadLink::default())
            .await
            .unwrap()
            .into_vec()
            .remove(0);
        let mut events = h.service.events().subscribe();

        let mut broken = settings("picky", 100.0);
        broken.provider_options = json!({ "broken": true }).as_object().cloned().unwrap();
        h.use_settings(broken).await;

        let err = h.service.remove(record.id).await.unwrap_err();
        assert!(matches!(err, UploadError::ProviderInit { ref provider, .. } if provider == "picky"));
        assert!(events.try_recv().is_err());
        assert!(h.mock.deletes().is_empty());
        assert_eq!(h.service.fetch(record.id).await.unwrap().id, record.id);
    }
}
