//! Provider configuration kept per environment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default ceiling, in kilobytes.
pub const DEFAULT_SIZE_LIMIT_KB: f64 = 1_000_000.0;

/// Active upload configuration. Replaced wholesale, never patched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSettings {
    /// Registered provider name, e.g. `local`.
    pub provider: String,

    /// Provider-specific options handed to its `init`.
    #[serde(default)]
    pub provider_options: Map<String, Value>,

    /// Per-file ceiling in kilobytes.
    #[serde(default = "default_size_limit")]
    pub size_limit: f64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_size_limit() -> f64 {
    DEFAULT_SIZE_LIMIT_KB
}

fn default_enabled() -> bool {
    true
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            provider_options: Map::new(),
            size_limit: DEFAULT_SIZE_LIMIT_KB,
            enabled: true,
        }
    }
}
