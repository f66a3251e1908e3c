//! Table of storage providers compiled into the binary.
//!
//! Built once at startup and shared read-only afterwards; lookups are plain
//! name → registration data, no dynamic loading.

use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use crate::{
    errors::{UploadError, UploadResult},
    providers::{self, ProviderResult, StorageProvider},
};

/// Startup-time values every provider factory may need.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub public_dir: PathBuf,
}

type ProviderInit = Box<
    dyn Fn(&ProviderContext, &Map<String, Value>) -> ProviderResult<Arc<dyn StorageProvider>>
        + Send
        + Sync,
>;

/// A named provider factory.
pub struct ProviderRegistration {
    pub name: String,
    pub label: String,
    init: ProviderInit,
}

impl ProviderRegistration {
    pub fn new<F>(name: impl Into<String>, label: impl Into<String>, init: F) -> Self
    where
        F: Fn(&ProviderContext, &Map<String, Value>) -> ProviderResult<Arc<dyn StorageProvider>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            label: label.into(),
            init: Box::new(init),
        }
    }

    /// Build a provider instance from its options.
    pub fn init(
        &self,
        ctx: &ProviderContext,
        options: &Map<String, Value>,
    ) -> UploadResult<Arc<dyn StorageProvider>> {
        (self.init)(ctx, options).map_err(|err| UploadError::ProviderInit {
            provider: self.name.clone(),
            reason: err.to_string(),
        })
    }
}

impl std::fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish()
    }
}

/// Name and label, as listed by the settings endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderSummary {
    pub name: String,
    pub label: String,
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: BTreeMap<String, Arc<ProviderRegistration>>,
}

impl ProviderRegistryBuilder {
    /// Later registrations under the same name replace earlier ones.
    pub fn register(mut self, registration: ProviderRegistration) -> Self {
        self.providers
            .insert(registration.name.clone(), Arc::new(registration));
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}

#[derive(Debug)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<ProviderRegistration>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Every provider enabled at compile time; `local` is always present.
    pub fn installed() -> Self {
        let builder = Self::builder().register(ProviderRegistration::new(
            "local",
            "Local server",
            providers::local::init,
        ));
        #[cfg(feature = "provider-s3")]
        let builder = builder.register(ProviderRegistration::new(
            "s3",
            "Amazon Web Service S3",
            providers::s3::init,
        ));
        #[cfg(feature = "provider-cloudinary")]
        let builder = builder.register(ProviderRegistration::new(
            "cloudinary",
            "Cloudinary",
            providers::cloudinary::init,
        ));
        #[cfg(feature = "provider-swift")]
        let builder = builder.register(ProviderRegistration::new(
            "swift",
            "OpenStack Swift container",
            providers::swift::init,
        ));
        builder.build()
    }

    pub fn get(&self, name: &str) -> UploadResult<Arc<ProviderRegistration>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| UploadError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    pub fn list(&self) -> Vec<ProviderSummary> {
        self.providers
            .values()
            .map(|p| ProviderSummary {
                name: p.name.clone(),
                label: p.label.clone(),
            })
            .collect()
    }
}
