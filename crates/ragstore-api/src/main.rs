//! ragstore-api - HTTP service for the ragstore document-embedding store

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragstore_api::{router, AppConfig, AppState, EmbeddingProvider, WebhookNotifier};
use ragstore_core::{EmbeddingBackend, NoopNotifier, NotificationSink};
use ragstore_db::{Database, PoolManager};
use ragstore_inference::{HashEmbeddingModel, OffloadedBackend, OllamaBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "ragstore_api=info,ragstore_db=info,tower_http=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ragstore_api=info,ragstore_db=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("ragstore-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = AppConfig::from_env()?;
    let webhook_state = if config.webhook_url.is_some() {
        "enabled"
    } else {
        "disabled"
    };
    info!(
        subsystem = "api",
        schema = %config.schema,
        provider = ?config.provider,
        model = %config.embed_model,
        dimension = config.dimension,
        workers = config.embed_workers,
        mirror_mode = ?config.mirror_mode,
        webhook = webhook_state,
        "Configuration loaded"
    );

    let embedder: Arc<dyn EmbeddingBackend> = match config.provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaBackend::with_config(
            config.ollama_url.clone(),
            config.embed_model.clone(),
            config.dimension,
        )?),
        EmbeddingProvider::Hash => Arc::new(OffloadedBackend::new(
            HashEmbeddingModel::new(config.dimension),
            config.embed_workers,
        )),
    };

    let pools = Arc::new(PoolManager::new(
        config.database_url.clone(),
        config.pool_config(),
    ));
    let db = Database::open(pools, config.store_config(), embedder).await?;
    let global = db.initialize().await?;
    info!(subsystem = "api", db_table = %global, "Database ready");

    let notifier: Arc<dyn NotificationSink> = match &config.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url, config.webhook_secret.clone())?;
            info!(subsystem = "api", url = %notifier.url(), "Webhook notifications enabled");
            Arc::new(notifier)
        }
        None => Arc::new(NoopNotifier),
    };

    let app = router(AppState {
        db: db.clone(),
        notifier,
    });

    let addr: SocketAddr = config.bind_addr().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
