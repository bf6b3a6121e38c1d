//! `GET /_tapwire/health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload containing the server
//! version, uptime, config metadata, the active log store and cumulative
//! forwarding and recording statistics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub config: ConfigHealth,
    pub log_store: String,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct ConfigHealth {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub routes: usize,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub exchanges_recorded: u64,
    pub record_failures: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loaded = &state.config;
    let recorder = state.recorder.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config: ConfigHealth {
            source: loaded.source_name.clone(),
            version: loaded.version.short().to_string(),
            loaded_ago_seconds: loaded.loaded_at.elapsed().as_secs(),
            routes: loaded.routes,
        },
        log_store: state.recorder.store_name().to_string(),
        stats: StatsResponse {
            requests_forwarded: state.stats.forwarded.load(Ordering::Relaxed),
            requests_failed: state.stats.failed.load(Ordering::Relaxed),
            exchanges_recorded: recorder.recorded.load(Ordering::Relaxed),
            record_failures: recorder.failures.load(Ordering::Relaxed),
        },
    })
}
