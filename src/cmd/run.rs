//! `tapwire run`: start the proxy server.
//!
//! Loads the configuration file, opens the log store, and serves the
//! Axum router until SIGTERM / Ctrl+C. Configuration is read once; the
//! route tree is immutable for the life of the process.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::RunArgs;
use crate::config::{self, ConfigSource};
use crate::error::TapwireError;
use crate::logging;
use crate::recorder::{LogStore, Recorder, TracingLogStore};
use crate::server::{self, AppState};

const CANDIDATES: [&str; 4] = ["tapwire.yaml", "tapwire.yml", "tapwire.json", "tapwire.toml"];

pub async fn execute(args: RunArgs) -> Result<(), TapwireError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let source = resolve_config_source(args.config.as_deref()).await?;
    let (config, version) = source.load().await?;

    for (pattern, winner) in config::validation::duplicate_patterns(&config) {
        tracing::warn!(pattern = %pattern, winner, "duplicate route pattern, later entry wins");
    }

    let store = open_log_store(&args).await?;
    let recorder = Recorder::new(store);

    let state = Arc::new(AppState::new(
        &config,
        version,
        source.name(),
        Arc::new(server::build_http_client()),
        recorder.clone(),
        args.timeout,
    ));

    let router = server::build_router(state.clone(), args.max_body);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        routes = config.routes.len(),
        config_version = %state.config.version.short(),
        log_store = recorder.store_name(),
        timeout_ms = ?state.settings.relay.timeout.map(|t| t.as_millis()),
        "tapwire started"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    tracing::info!("tapwire stopped");
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_log_store(args: &RunArgs) -> Result<Arc<dyn LogStore>, TapwireError> {
    if let Some(path) = &args.sqlite_path {
        let store = crate::recorder::sqlite::SqliteLogStore::open(path).await?;
        tracing::info!(path = %path.display(), "recording exchanges to sqlite");
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(TracingLogStore::default()))
}

#[cfg(not(feature = "sqlite"))]
#[allow(clippy::unused_async)]
async fn open_log_store(_args: &RunArgs) -> Result<Arc<dyn LogStore>, TapwireError> {
    Ok(Arc::new(TracingLogStore::default()))
}

async fn resolve_config_source(
    explicit: Option<&Path>,
) -> Result<Box<dyn ConfigSource>, TapwireError> {
    if let Some(path) = explicit {
        return config::source_for_path(path);
    }

    for name in &CANDIDATES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return config::source_for_path(&path);
        }
    }

    Err(TapwireError::NoConfigSource {
        hint: "Provide --config <file> or create ./tapwire.yaml.\n  \
               Run 'tapwire init' to create a config file."
            .into(),
    })
}
