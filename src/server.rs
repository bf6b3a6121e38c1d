//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding the route tree,
//! request settings, upstream client, recorder, stats and uptime),
//! [`build_router`] for constructing the Axum router with middleware
//! layers, [`build_http_client`] for the connection-pooled hyper client,
//! and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::model::Config;
use crate::config::ConfigVersion;
use crate::health::health_handler;
use crate::proxy::routing::RouteTree;
use crate::proxy::upstream::Upstream;
use crate::proxy::{self, ProxySettings};
use crate::recorder::Recorder;

pub const HEALTH_PATH: &str = "/_tapwire/health";

#[derive(Debug)]
pub struct LoadedConfig {
    pub version: ConfigVersion,
    pub source_name: String,
    pub loaded_at: Instant,
    pub routes: usize,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub forwarded: AtomicU64,
    pub failed: AtomicU64,
}

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, http_body_util::Full<bytes::Bytes>>;

pub struct AppState {
    pub routes: RouteTree<String>,
    pub settings: ProxySettings,
    pub upstream: Arc<dyn Upstream>,
    pub recorder: Recorder,
    pub config: LoadedConfig,
    pub start_time: Instant,
    pub stats: Stats,
}

impl AppState {
    /// `timeout_override` (milliseconds) replaces `defaults.timeout` when set.
    #[must_use]
    pub fn new(
        config: &Config,
        version: ConfigVersion,
        source_name: impl Into<String>,
        upstream: Arc<dyn Upstream>,
        recorder: Recorder,
        timeout_override: Option<u64>,
    ) -> Self {
        Self {
            routes: config.route_tree(),
            settings: ProxySettings::from_defaults(&config.defaults, timeout_override),
            upstream,
            recorder,
            config: LoadedConfig {
                version,
                source_name: source_name.into(),
                loaded_at: Instant::now(),
                routes: config.routes.len(),
            },
            start_time: Instant::now(),
            stats: Stats::default(),
        }
    }
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring`.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

pub fn build_router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .fallback(proxy::forward_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
