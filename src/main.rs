mod captcha;
mod config;
mod errors;
mod extractors;
mod gate;
mod instrumentation;
mod keys;
mod models;
mod pages;
mod repository;
mod routes;
mod storage;
mod sweep;
#[cfg(test)]
mod tests;

#[cfg(not(unix))]
use std::future;
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, put},
    Extension, Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::{
    captcha::CaptchaVerifier,
    config::Config,
    keys::KeyGenerator,
    pages::Pages,
    repository::RecordStore,
    routes::{
        delete::delete_endpoint, download::download_endpoint, index::index_endpoint,
        upload::upload_endpoint,
    },
    storage::StorageBackend,
    sweep::ServeLeases,
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Clone)]
struct AppContext {
    cfg: Arc<Config>,
    records: RecordStore,
    storage: Arc<dyn StorageBackend>,
    keys: KeyGenerator,
    verifier: CaptchaVerifier,
    leases: ServeLeases,
    pages: Arc<Pages>,
}

impl AppContext {
    fn new(
        cfg: Config,
        records: RecordStore,
        storage: Arc<dyn StorageBackend>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            keys: KeyGenerator::new(&cfg.keys),
            verifier: CaptchaVerifier::new(&cfg.access)?,
            cfg: Arc::new(cfg),
            records,
            storage,
            leases: ServeLeases::default(),
            pages: Arc::new(Pages::new()?),
        })
    }

    async fn from_config(cfg: Config) -> anyhow::Result<Self> {
        let records = RecordStore::connect(&cfg.database.url, cfg.database.max_connections).await?;
        let storage = storage::from_config(&cfg.storage).await?;
        Self::new(cfg, records, storage)
    }
}

fn router(ctx: AppContext) -> Router {
    let cors_layer = ctx
        .cfg
        .general
        .cors_origin
        .as_deref()
        .and_then(|origin| HeaderValue::from_str(origin).ok())
        .map(|origin| {
            CorsLayer::new()
                .allow_methods([Method::GET, Method::PUT, Method::DELETE])
                .allow_origin(AllowOrigin::exact(origin))
        });
    let timeout = Duration::from_secs(ctx.cfg.general.request_timeout_secs);

    let router = Router::new()
        .route("/", get(index_endpoint))
        .route("/:file_name", put(upload_endpoint))
        .route("/:key/:file_name", get(download_endpoint))
        .route("/:key/:delete_key/:file_name", axum::routing::delete(delete_endpoint))
        .layer((
            DefaultBodyLimit::disable(),
            TimeoutLayer::new(timeout),
            Extension(ctx),
        ));

    let router = match cors_layer {
        Some(cors) => router.layer(cors),
        None => router,
    };

    instrumentation::add_layer(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load_config(&config_path).await?;
    instrumentation::setup(&cfg.instrumentation.directives)?;

    let ctx = AppContext::from_config(cfg).await?;

    let sweep_cfg = &ctx.cfg.sweep;
    tokio::spawn(sweep::run(
        ctx.records.clone(),
        ctx.storage.clone(),
        ctx.leases.clone(),
        Duration::from_secs(sweep_cfg.interval_secs),
        sweep_cfg.expire_after_days.map(chrono::Duration::days),
    ));

    let address = ctx.cfg.general.bind_address.clone();
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("api is available on http://{address}");

    axum::serve(
        listener,
        router(ctx).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(why) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {why:?}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(why) => {
                tracing::error!("failed to install SIGTERM handler: {why:?}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
