use std::collections::HashSet;

use anyhow::{bail, Context};
use axum::http::HeaderValue;
use serde::Deserialize;
use tokio::fs;

use crate::models::StorageMethod;

pub async fn load_config(path: &str) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config file `{path}`"))?;
    let parsed: Config = toml::from_str(&contents)?;
    parsed.validate()?;
    Ok(parsed)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub bind_address: String,
    /// Public base used when building download and delete URLs.
    pub domain: String,
    pub cors_origin: Option<String>,
    pub max_upload_bytes: u64,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum StorageConfig {
    Local {
        root: String,
    },
    ObjectStore {
        bucket: String,
        region: String,
        /// Custom endpoint for S3-compatible services, e.g. MinIO.
        endpoint: Option<String>,
        access_key: String,
        secret_key: String,
        #[serde(default)]
        path_style: bool,
        #[serde(default = "default_presign_expiry")]
        presign_expiry_secs: u32,
    },
}

impl StorageConfig {
    pub fn method(&self) -> StorageMethod {
        match self {
            Self::Local { .. } => StorageMethod::Local,
            Self::ObjectStore { .. } => StorageMethod::ObjectStore,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_key_length")]
    pub key_length: usize,
    #[serde(default = "default_delete_key_length")]
    pub delete_key_length: usize,
    #[serde(default = "default_alphabet")]
    pub alphabet: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            key_length: default_key_length(),
            delete_key_length: default_delete_key_length(),
            alphabet: default_alphabet(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Downloads served freely before a human check is required.
    pub download_threshold: i64,
    pub captcha_secret: String,
    pub captcha_site_key: String,
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Files not accessed for this many days are reclaimed.
    pub expire_after_days: Option<i64>,
    #[serde(default)]
    pub purge_on_delete: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            expire_after_days: None,
            purge_on_delete: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentationConfig {
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    pub access: AccessConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    pub instrumentation: InstrumentationConfig,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let alphabet: Vec<char> = self.keys.alphabet.chars().collect();
        let distinct: HashSet<&char> = alphabet.iter().collect();
        if distinct.len() != alphabet.len() {
            bail!("keys.alphabet must not contain duplicate characters");
        }
        if !(2..=255).contains(&alphabet.len()) {
            bail!("keys.alphabet must have between 2 and 255 characters");
        }
        if alphabet.iter().any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%')) {
            bail!("keys.alphabet must only contain URL path safe characters");
        }
        if self.keys.key_length == 0 || self.keys.delete_key_length == 0 {
            bail!("key lengths must be positive");
        }
        if self.keys.max_attempts == 0 {
            bail!("keys.max_attempts must be positive");
        }
        if self.access.download_threshold < 0 {
            bail!("access.download_threshold must not be negative");
        }
        if let Some(origin) = &self.general.cors_origin {
            if HeaderValue::from_str(origin).is_err() {
                bail!("general.cors_origin is not a valid header value");
            }
        }
        if self.sweep.interval_secs == 0 {
            bail!("sweep.interval_secs must be positive");
        }
        Ok(())
    }
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_connections() -> u32 {
    16
}

fn default_presign_expiry() -> u32 {
    60
}

fn default_key_length() -> usize {
    8
}

fn default_delete_key_length() -> usize {
    21
}

fn default_alphabet() -> String {
    "1234567890aAbBcCdDeEfFgGhHiIjJkKlLmMnNoOpPqQrRsStTuUvVwWxXyYzZ".to_string()
}

fn default_max_attempts() -> u32 {
    16
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_verify_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    3600
}
