use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use std::{env, str::FromStr};

use crate::models::settings::{DEFAULT_SIZE_LIMIT_KB, UploadSettings};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub public_dir: String,
    pub tmp_dir: String,
    pub database_url: String,
    pub environment: String,
    pub provider: String,
    pub provider_options: Map<String, Value>,
    pub size_limit: f64,
    pub upload_enabled: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media upload API with pluggable storage providers")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory served publicly; the local provider writes below it (overrides MEDIA_UPLOAD_PUBLIC_DIR)
    #[arg(long)]
    pub public_dir: Option<String>,

    /// Spool directory for incoming multipart parts (overrides MEDIA_UPLOAD_TMP_DIR)
    #[arg(long)]
    pub tmp_dir: Option<String>,

    /// Database URL (overrides MEDIA_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Settings environment this instance serves (overrides MEDIA_UPLOAD_ENVIRONMENT)
    #[arg(long)]
    pub environment: Option<String>,

    /// Default storage provider (overrides MEDIA_UPLOAD_PROVIDER)
    #[arg(long)]
    pub provider: Option<String>,

    /// Default provider options as a JSON object (overrides MEDIA_UPLOAD_PROVIDER_OPTIONS)
    #[arg(long)]
    pub provider_options: Option<String>,

    /// Per-file size ceiling in KB (overrides MEDIA_UPLOAD_SIZE_LIMIT)
    #[arg(long)]
    pub size_limit: Option<f64>,

    /// Accept uploads (overrides MEDIA_UPLOAD_ENABLED)
    #[arg(long)]
    pub upload_enabled: Option<bool>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Typed env var with a default when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_options(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("parsing provider options")? {
        Value::Object(map) => Ok(map),
        other => bail!("provider options must be a JSON object, got `{}`", other),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over `MEDIA_UPLOAD_*` variables, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_or("MEDIA_UPLOAD_HOST", "0.0.0.0");
        let env_port = env_parse("MEDIA_UPLOAD_PORT", 1337u16)?;
        let env_public = env_or("MEDIA_UPLOAD_PUBLIC_DIR", "./public");
        let env_tmp = env_or("MEDIA_UPLOAD_TMP_DIR", "./data/tmp");
        let env_db = env_or("MEDIA_UPLOAD_DATABASE_URL", "sqlite://./data/meta/media.db");
        let env_environment = env_or("MEDIA_UPLOAD_ENVIRONMENT", "development");
        let env_provider = env_or("MEDIA_UPLOAD_PROVIDER", "local");
        let env_options = env_or("MEDIA_UPLOAD_PROVIDER_OPTIONS", "{}");
        let env_size_limit = env_parse("MEDIA_UPLOAD_SIZE_LIMIT", DEFAULT_SIZE_LIMIT_KB)?;
        let env_enabled = env_parse("MEDIA_UPLOAD_ENABLED", true)?;

        // --- Merge ---
        let provider_options = parse_options(&args.provider_options.unwrap_or(env_options))?;
        let size_limit = args.size_limit.unwrap_or(env_size_limit);
        if !size_limit.is_finite() || size_limit < 0.0 {
            bail!("size limit must be a non-negative number of KB, got {}", size_limit);
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            public_dir: args.public_dir.unwrap_or(env_public),
            tmp_dir: args.tmp_dir.unwrap_or(env_tmp),
            database_url: args.database_url.unwrap_or(env_db),
            environment: args.environment.unwrap_or(env_environment),
            provider: args.provider.unwrap_or(env_provider),
            provider_options,
            size_limit,
            upload_enabled: args.upload_enabled.unwrap_or(env_enabled),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings used until an environment stores its own.
    pub fn default_settings(&self) -> UploadSettings {
        UploadSettings {
            provider: self.provider.clone(),
            provider_options: self.provider_options.clone(),
            size_limit: self.size_limit,
            enabled: self.upload_enabled,
        }
    }
}
