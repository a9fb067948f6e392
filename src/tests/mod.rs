
use std::{path::Path, sync::Arc};

use axum::{body::Bytes, http::StatusCode};
use axum_test::TestServer;
use tempfile::TempDir;

use crate::{
    config::{
        AccessConfig, Config, DatabaseConfig, GeneralConfig, InstrumentationConfig, KeysConfig,
        StorageConfig, SweepConfig,
    },
    repository::{memory_store, RecordStore},
    router,
    routes::upload::UploadResponse,
    storage::{LocalStorage, StorageBackend},
    AppContext,
};

pub const DOMAIN: &str = "http://drop.test";
pub const BASIC_FILE: &[u8] = b"hello world, this is a stored file\n";

pub type TestResult = anyhow::Result<()>;

pub struct Options {
    pub threshold: i64,
    pub max_upload_bytes: u64,
    pub purge_on_delete: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            threshold: 3,
            max_upload_bytes: 1024 * 1024,
            purge_on_delete: false,
        }
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub records: RecordStore,
    pub storage_root: TempDir,
}

fn config(root: &Path, verify_url: String, opts: &Options) -> Config {
    Config {
        general: GeneralConfig {
            bind_address: "127.0.0.1:0".to_string(),
            domain: DOMAIN.to_string(),
            cors_origin: None,
            max_upload_bytes: opts.max_upload_bytes,
            trust_forwarded_for: true,
            request_timeout_secs: 30,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        storage: StorageConfig::Local {
            root: root.to_string_lossy().into_owned(),
        },
        keys: KeysConfig::default(),
        access: AccessConfig {
            download_threshold: opts.threshold,
            captcha_secret: mock_verifier::SECRET.to_string(),
            captcha_site_key: "site-key".to_string(),
            verify_url,
            verify_timeout_secs: 2,
        },
        sweep: SweepConfig {
            purge_on_delete: opts.purge_on_delete,
            ..SweepConfig::default()
        },
        instrumentation: InstrumentationConfig { directives: Vec::new() },
    }
}

pub async fn spawn_app(opts: Options) -> anyhow::Result<TestApp> {
    let storage_root = TempDir::new()?;
    let storage = Arc::new(LocalStorage::new(storage_root.path()).await?);
    spawn_app_with(opts, storage_root, storage).await
}

/// Same as [`spawn_app`] but serving bytes from `storage`.
pub async fn spawn_app_with(
    opts: Options,
    storage_root: TempDir,
    storage: Arc<dyn StorageBackend>,
) -> anyhow::Result<TestApp> {
    let verify_url = mock_verifier::spawn().await;
    let cfg = config(storage_root.path(), verify_url, &opts);
    cfg.validate()?;

    let records = memory_store().await;
    let ctx = AppContext::new(cfg, records.clone(), storage)?;
    let server = TestServer::new(router(ctx))?;

    Ok(TestApp {
        server,
        records,
        storage_root,
    })
}

impl TestApp {
    pub async fn upload(&self, file_name: &str, content: &'static [u8]) -> UploadResponse {
        let response = self
            .server
            .put(&format!("/{file_name}"))
            .bytes(Bytes::from_static(content))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        response.json()
    }
}

/// Request path of a URL handed out by the upload endpoint.
pub fn path_of(url: &str) -> &str {
    url.strip_prefix(DOMAIN).expect("url built from the configured domain")
}

/// Key segment of a download URL.
pub fn key_of(download_url: &str) -> String {
    let path = path_of(download_url).trim_start_matches('/');
    path.split('/').next().unwrap_or_default().to_string()
}
