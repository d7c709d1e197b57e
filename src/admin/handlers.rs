use axum::{
    extract::State,
    Json,
};
use serde::Serialize;
use crate::config::GatewayConfig;
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub upstream: String,
    pub api_prefix: String,
    pub config_reloads: usize,
    pub uptime_secs: u64,
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Json<SystemStatus> {
    let snapshot = state.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        upstream: snapshot.upstream.base().to_string(),
        api_prefix: snapshot.upstream.api_prefix().to_string(),
        config_reloads: state.reload_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Active configuration with the admin key masked.
pub async fn get_config(
    State(state): State<AppState>,
) -> Json<GatewayConfig> {
    let mut config = state.snapshot().config.clone();
    if !config.admin.api_key.is_empty() {
        config.admin.api_key = "********".to_string();
    }
    Json(config)
}
